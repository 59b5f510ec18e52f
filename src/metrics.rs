//! Prometheus counters for the AMI client.
//!
//! Three label-less counters, scraped by whatever registry the host
//! application exposes.

use prometheus::{core::Collector, IntCounter, Opts, Registry};

/// Counters fed by the client and its reader task.
#[derive(Debug, Clone)]
pub struct AmiMetrics {
    /// Dial attempts.
    connections: IntCounter,
    /// Commands written, including the login.
    messages_sent: IntCounter,
    /// Frames decoded by the reader, including empty ones.
    messages_received: IntCounter,
}

impl AmiMetrics {
    /// Create counters under `namespace` (the service name).
    ///
    /// Characters that are not valid in a metric name are replaced with `_`.
    pub fn new(namespace: &str) -> prometheus::Result<Self> {
        let namespace = sanitize_namespace(namespace);

        let connections = counter(
            &namespace,
            "ami_connections_count",
            "Total number of AMI connection attempts",
        )?;
        let messages_sent = counter(
            &namespace,
            "ami_messages_sent",
            "Total number of AMI commands sent",
        )?;
        let messages_received = counter(
            &namespace,
            "ami_messages_received",
            "Total number of AMI frames received",
        )?;

        Ok(Self {
            connections,
            messages_sent,
            messages_received,
        })
    }

    /// Boxed collectors, ready for `Registry::register`.
    pub fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.messages_sent.clone()),
            Box::new(self.messages_received.clone()),
            Box::new(self.connections.clone()),
        ]
    }

    /// Register all three counters with `registry`.
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        for collector in self.collectors() {
            registry.register(collector)?;
        }
        Ok(())
    }

    pub(crate) fn store_connection_attempt(&self) {
        self.connections
            .inc();
    }

    pub(crate) fn store_sent_message(&self) {
        self.messages_sent
            .inc();
    }

    pub(crate) fn store_received_message(&self) {
        self.messages_received
            .inc();
    }

    /// Dial attempts so far.
    pub fn connection_attempts(&self) -> u64 {
        self.connections
            .get()
    }

    /// Commands written so far.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
            .get()
    }

    /// Frames decoded so far.
    pub fn messages_received(&self) -> u64 {
        self.messages_received
            .get()
    }
}

fn counter(namespace: &str, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help).namespace(namespace))
}

fn sanitize_namespace(namespace: &str) -> String {
    let mut out: String = namespace
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit())
    {
        out.insert(0, '_');
    }
    out
}
