//! Twitch IRC Chat Runner Library
//!
//! Connects to Twitch chat over plaintext IRC on a background thread and
//! hands everything to the host through queues, so a game loop or UI tick
//! can poll for chat without ever touching the socket.
//!
//! # Features
//! - Connect, authenticate and join a channel
//! - Tagged message parsing (subscriber badges, bits, color, display name)
//! - Automatic keep-alive replies
//! - Rate-limited outbound chat, whispers and channel switching
//! - Connection status events for every failure and disconnect
//!
//! # Architecture
//! One worker thread per connection attempt owns the socket and runs the
//! connect → authenticate → join → stream state machine:
//! - `Runner` is the host handle: it starts the worker and owns the host
//!   ends of three single-producer single-consumer queues
//! - The worker never calls back into host code; it only pushes message
//!   batches and connection events
//! - Two atomic flags (`should_exit`, `connected`) are the only other
//!   state crossing threads
//!
//! # Example
//! ```ignore
//! use std::time::Duration;
//! use twitch_irc_runner::{ClientConfig, Runner};
//!
//! let mut runner = Runner::new(ClientConfig::default());
//! runner.start("oauth:token", "my_bot", "some_channel", Duration::from_millis(1200))?;
//!
//! loop {
//!     while let Some(event) = runner.next_connection_event() {
//!         println!("{:?}: {}", event.kind, event.text);
//!     }
//!     for message in runner.drain_messages() {
//!         println!("{}: {}", message.sender, message.body);
//!     }
//!     // ... rest of the frame
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod parser;
pub mod queue;
pub mod rate;
pub mod runner;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use config::ClientConfig;
pub use error::{ClientError, SendError};
pub use message::{
    ChatMessage, ConnectionEvent, ConnectionEventKind, OutboundKind, OutboundRequest,
    ReceivedBatch,
};
pub use parser::{parse_line, ParsedLine};
pub use rate::DEFAULT_SEND_INTERVAL;
pub use runner::Runner;
pub use session::{ConnectionInfo, Phase};
pub use types::{Channel, Rgb, SessionId};
