//! Protocol constants and configuration values

/// Default Asterisk Manager Interface port
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// Default host used when settings leave it unset
pub const DEFAULT_AMI_HOST: &str = "127.0.0.1";

/// Separator between a field name and its value on one line
pub const FIELD_SEPARATOR: &str = ": ";

/// Line terminator emitted after every field, and alone as the frame terminator
pub const LINE_TERMINATOR: &str = "\n";

/// Socket read size for the handshake and the reader loop (8KB)
pub const SOCKET_BUF_SIZE: usize = 8 * 1024;

/// Maximum bytes buffered without completing a line (1MB).
/// AMI lines are short; anything larger means the peer is not speaking AMI.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Maximum bytes of field lines accepted into one frame before its blank line (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Capacity of the channel delivering incoming frames
pub const MESSAGE_QUEUE_SIZE: usize = 100;

/// Capacity of the channel delivering the reader's fatal error
pub const ERROR_QUEUE_SIZE: usize = 1;

/// Budget for the login handshake in milliseconds
pub const AUTH_TIMEOUT_MS: u64 = 10_000;

/// Write deadline applied to every command in milliseconds
pub const WRITE_TIMEOUT_MS: u64 = 1_000;

/// Pause after spawning the reader so it is consuming before connect returns
pub const READER_SETTLE_MS: u64 = 50;

/// Default dial budget in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Default metrics namespace
pub const DEFAULT_SERVICE_NAME: &str = "ami";

/// `Response` value of a successful reply
pub const RESPONSE_SUCCESS: &str = "Success";

/// `Response` value of a failed reply
pub const RESPONSE_ERROR: &str = "Error";

/// `Message` value Asterisk sends on a successful login
pub const MESSAGE_AUTH_ACCEPTED: &str = "Authentication accepted";

/// `Action` of the login command
pub const ACTION_LOGIN: &str = "Login";
