//! Values exchanged between the worker and the host
//!
//! Everything here is plain owned data so it can cross the thread boundary
//! through the queues. Inbound types derive `Serialize` so hosts can log or
//! forward them as JSON.

use serde::Serialize;

use crate::error::ClientError;
use crate::types::{Channel, Rgb};

/// Kind of a connection status event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionEventKind {
    /// Authentication succeeded
    Connected,
    /// Resolution, socket or initial write failure
    FailedToConnect,
    /// Rejected welcome, failed join or auth timeout
    FailedToAuthenticate,
    /// Non-fatal problem, the connection stays up
    Error,
    /// Any server line that is not a chat message
    ServerMessage,
    /// Socket lost or closed by request
    Disconnected,
}

impl ConnectionEventKind {
    /// True for kinds after which the worker produces nothing more
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::FailedToConnect | Self::FailedToAuthenticate | Self::Disconnected
        )
    }
}

/// Connection status event (worker → host)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionEvent {
    pub kind: ConnectionEventKind,
    pub text: String,
}

impl ConnectionEvent {
    pub fn new(kind: ConnectionEventKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn server_message(line: impl Into<String>) -> Self {
        Self::new(ConnectionEventKind::ServerMessage, line)
    }
}

/// Convert a worker failure into the event the host sees
impl From<ClientError> for ConnectionEvent {
    fn from(err: ClientError) -> Self {
        let kind = match &err {
            ClientError::Resolve(_)
            | ClientError::NoAddress
            | ClientError::SocketCreate(_)
            | ClientError::Connect(_)
            | ClientError::Handshake(_)
            | ClientError::Runtime(_) => ConnectionEventKind::FailedToConnect,
            ClientError::AuthRejected(_)
            | ClientError::AuthTimeout
            | ClientError::AuthClosed
            | ClientError::JoinFailed(_) => ConnectionEventKind::FailedToAuthenticate,
            ClientError::Cancelled => ConnectionEventKind::Disconnected,
            // Host-side errors are returned to the caller, not queued
            _ => ConnectionEventKind::Error,
        };
        ConnectionEvent::new(kind, err.to_string())
    }
}

/// Kind of an outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    ChatMessage,
    JoinChannel,
}

/// Outbound request (host → worker)
///
/// For `JoinChannel` the body is unused and a `None` channel means
/// "leave the current channel without joining another".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub kind: OutboundKind,
    pub body: String,
    pub channel: Option<Channel>,
}

impl OutboundRequest {
    /// Chat message to `channel`, or to the joined channel when empty
    pub fn chat(body: impl Into<String>, channel: &str) -> Self {
        Self {
            kind: OutboundKind::ChatMessage,
            body: body.into(),
            channel: Channel::parse_optional(channel),
        }
    }

    /// Switch to `channel`; an empty name only parts the current one
    pub fn join(channel: &str) -> Self {
        Self {
            kind: OutboundKind::JoinChannel,
            body: String::new(),
            channel: Channel::parse_optional(channel),
        }
    }
}

/// One parsed chat line
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ChatMessage {
    /// Login name from the `nick!user@host` prefix
    pub sender: String,
    /// Value of the `display-name` tag, when present
    pub display_name: Option<String>,
    /// Channel the message was posted to
    pub channel: Option<Channel>,
    pub body: String,
    pub is_subscriber: bool,
    pub has_bits: bool,
    pub bits_amount: f32,
    pub color: Option<Rgb>,
}

impl ChatMessage {
    /// Plain message without tag metadata
    pub fn plain(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            ..Self::default()
        }
    }
}

/// Chat messages parsed from one read cycle, in arrival order
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ReceivedBatch {
    pub messages: Vec<ChatMessage>,
}

impl ReceivedBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Append another batch, keeping order
    pub fn extend(&mut self, other: ReceivedBatch) {
        self.messages.extend(other.messages);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Sender names, parallel to `bodies`
    pub fn senders(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|m| m.sender.as_str())
    }

    pub fn bodies(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|m| m.body.as_str())
    }
}

impl IntoIterator for ReceivedBatch {
    type Item = ChatMessage;
    type IntoIter = std::vec::IntoIter<ChatMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}
