//! Error types for the AMI client

use thiserror::Error;

/// Result type for AMI operations.
pub type AmiResult<T> = Result<T, AmiError>;

/// Errors produced by the AMI client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AmiError {
    /// TCP dial failed or exceeded the connection timeout.
    /// The underlying cause is logged, not carried.
    #[error("TCP connection failed")]
    ConnectionFailed,

    /// The client is disabled by settings; no network activity was attempted.
    #[error("AMI client disabled by settings")]
    ClientDisabled,

    /// No qualifying login reply arrived within the handshake budget.
    #[error("auth timeout")]
    AuthTimeout,

    /// The server rejected the login.
    #[error("authentication failed: {message}")]
    AuthFailed {
        /// `Message` field of the server's error response.
        message: String,
    },

    /// Transport read/write error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer bytes were written than the serialized command length.
    #[error("command not sent, {written} of {expected} bytes written")]
    PartialWrite {
        /// Bytes accepted by the socket.
        written: usize,
        /// Serialized command length.
        expected: usize,
    },

    /// A bounded operation exceeded its deadline.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// No connection is established.
    #[error("not connected")]
    NotConnected,

    /// `disconnect()` was called; this client cannot be reused.
    #[error("client closed")]
    ClientClosed,

    /// The peer sent data that cannot be AMI.
    #[error("protocol error: {message}")]
    ProtocolError {
        /// What went wrong.
        message: String,
    },

    /// The metrics sink could not be built.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl AmiError {
    /// Build an [`AmiError::AuthFailed`] from the server's message.
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed {
            message: message.into(),
        }
    }

    /// Build an [`AmiError::ProtocolError`].
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    /// Whether this error only means "no data yet" and the read may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            AmiError::Io(e) => is_timeout(e),
            AmiError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Timeout-like IO errors (read deadline hit, socket would block).
pub(crate) fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}
