//! Client settings

use crate::constants::{
    DEFAULT_AMI_HOST, DEFAULT_AMI_PORT, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_SERVICE_NAME,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for an [`AmiClient`](crate::AmiClient).
///
/// Deserializable so it can be embedded in the host application's own
/// configuration; timeouts are milliseconds on the wire.
///
/// ```
/// use asterisk_ami_tokio::AmiSettings;
///
/// let settings = AmiSettings::new("pbx.example.net", 5038, "admin", "secret");
/// assert!(!settings.disabled);
/// assert_eq!(settings.read_timeout(), None);
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmiSettings {
    /// Namespace for the exported metrics.
    pub service_name: String,
    /// Manager host.
    pub host: String,
    /// Manager port.
    pub port: u16,
    /// Manager user (`[user]` section in `manager.conf`).
    pub username: String,
    /// Manager secret.
    pub password: String,
    /// Dial budget.
    pub connection_timeout_ms: u64,
    /// When set, `connect` returns immediately without touching the network.
    pub disabled: bool,
    /// Per-read deadline for the reader; 0 blocks indefinitely.
    pub read_timeout_ms: u64,
}

impl Default for AmiSettings {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            host: DEFAULT_AMI_HOST.to_string(),
            port: DEFAULT_AMI_PORT,
            username: String::new(),
            password: String::new(),
            connection_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            disabled: false,
            read_timeout_ms: 0,
        }
    }
}

impl AmiSettings {
    /// Settings for `host:port` with the given credentials; everything else default.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Dial budget as a [`Duration`].
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Read deadline, `None` when reads block indefinitely.
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

impl std::fmt::Debug for AmiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiSettings")
            .field("service_name", &self.service_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("disabled", &self.disabled)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .finish()
    }
}
