//! Tracing setup for applications and tests embedding the client.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the host unless it opts into this helper.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing_subscriber::util::TryInitError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

/// Install a global subscriber writing to stderr.
///
/// `verbosity`: 0=error, 1=warn, 2=info, 3=debug, 4+=trace. `RUST_LOG`
/// overrides it when set. Fails if a global subscriber already exists.
pub fn init_logging(verbosity: u8, format: LogFormat) -> Result<(), TryInitError> {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("asterisk_ami_tokio={}", level)));

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(verbosity >= 3)
                    .with_line_number(verbosity >= 3),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init(),
    }
}

/// Debug-level text logging for tests; repeated calls are ignored.
pub fn init_test_logging() {
    let _ = init_logging(3, LogFormat::Text);
}
