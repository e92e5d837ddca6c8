//! Error types for the chat runner
//!
//! Defines connection-level errors and queue send errors.
//! Uses thiserror for ergonomic error definitions.
//!
//! The `Display` text of each `ClientError` is what the host sees in the
//! matching `ConnectionEvent`, so the wording is part of the interface.

use thiserror::Error;

/// Connection and runner errors
///
/// Worker-side variants end the connection attempt and are turned into a
/// single `ConnectionEvent` (see `From<ClientError> for ConnectionEvent`).
/// Host-side variants (`AlreadyStarted`, `InvalidCredentials`, `Spawn`,
/// `Config`) are returned directly from the runner.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Hostname lookup failed
    #[error("Could not resolve hostname!")]
    Resolve(#[source] std::io::Error),

    /// Hostname lookup succeeded with zero addresses
    #[error("Could not resolve hostname!")]
    NoAddress,

    /// Socket allocation or option setup failed
    #[error("Could not create socket!")]
    SocketCreate(#[source] std::io::Error),

    /// TCP connect failed
    #[error("Connection to Twitch IRC failed!")]
    Connect(#[source] std::io::Error),

    /// PASS or NICK could not be written
    #[error("Could not send initial PASS and NICK messages for Auth")]
    Handshake(#[source] std::io::Error),

    /// Server answered the handshake with something other than the welcome numeric
    #[error("{0}")]
    AuthRejected(String),

    /// Server sent nothing during the whole retry budget
    #[error("Server did not respond")]
    AuthTimeout,

    /// Server closed the socket before the welcome numeric
    #[error("Server closed the connection during authentication")]
    AuthClosed,

    /// Initial JOIN could not be written
    #[error("Failed to join channel")]
    JoinFailed(#[source] std::io::Error),

    /// Stop was requested before streaming started
    #[error("Disconnected by request before authentication completed")]
    Cancelled,

    /// `start` was called on a runner that already has a worker
    #[error("Already connected / connecting / pending!")]
    AlreadyStarted,

    /// Empty token or username
    #[error("Invalid connection parameters. Check your strings.")]
    InvalidCredentials,

    /// Worker thread could not be spawned
    #[error("Could not spawn worker thread")]
    Spawn(#[source] std::io::Error),

    /// Worker runtime could not be built
    #[error("Could not build worker runtime")]
    Runtime(#[source] std::io::Error),

    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for `ClientConfig`
    #[error("Invalid config: {0}")]
    Config(#[from] serde_json::Error),
}

/// Queue send errors
///
/// Occurs when pushing into a queue whose consumer half has been dropped,
/// which for the outbound queue means the worker has exited.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The receiving end of the queue has been closed
    #[error("Channel closed")]
    ChannelClosed,
}
