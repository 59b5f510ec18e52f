//! Asterisk Manager Interface (AMI) client for Rust
//!
//! This crate provides an async client for Asterisk's Manager Interface,
//! the line-oriented `key: value` protocol on TCP port 5038. It logs in,
//! writes command frames, and pumps everything the server sends (responses
//! and events alike) through a bounded channel from a background task.
//!
//! # Architecture
//!
//! - [`AmiClient`] — dial, login handshake, command writes, teardown
//! - [`MessageStream`] — frames decoded by the background reader, in wire order
//! - an error receiver — the reader's first fatal error, after which it exits
//!
//! Reconnecting and matching responses to commands (via `ActionID`) are left
//! to the caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{AmiClient, AmiError, AmiSettings, Frame};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AmiError> {
//!     let (shutdown_tx, shutdown) = watch::channel(false);
//!     let mut client = AmiClient::new(AmiSettings::new("127.0.0.1", 5038, "admin", "secret"))?;
//!     client.connect(shutdown, true).await?;
//!
//!     let mut messages = client.take_messages().expect("messages taken once");
//!     let mut errors = client.take_errors().expect("errors taken once");
//!
//!     client
//!         .send_command(&Frame::action("Events").with_field("EventMask", "call"))
//!         .await?;
//!
//!     loop {
//!         tokio::select! {
//!             Some(frame) = messages.recv() => {
//!                 if frame.event() == Some("Hangup") {
//!                     println!("hangup on {:?}", frame.field("Channel"));
//!                 }
//!             }
//!             Some(err) = errors.recv() => {
//!                 eprintln!("reader stopped: {}", err);
//!                 break;
//!             }
//!             else => break,
//!         }
//!     }
//!
//!     let _ = shutdown_tx.send(true);
//!     client.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! # Wire format
//!
//! ```text
//! Action: Login
//! Username: admin
//! Secret: secret
//!
//! ```
//!
//! Field order is not significant and not preserved; compare frames as sets.

#[macro_use]
mod macros;

pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod frame;
pub mod headers;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub(crate) mod reader;

pub use config::AmiSettings;
pub use connection::{AmiClient, ConnectionState};
pub use constants::DEFAULT_AMI_PORT;
pub use error::{AmiError, AmiResult};
pub use frame::Frame;
pub use headers::{AmiHeader, ParseAmiHeaderError};
pub use metrics::AmiMetrics;
pub use protocol::{parse_frame, serialize, FrameDecoder};
pub use reader::MessageStream;
