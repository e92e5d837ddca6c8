//! Connection identity and state shared with the host
//!
//! `Session` is owned by the worker and is the only place the joined channel
//! changes. `SharedState` holds what the host may observe: the two flags,
//! the current phase, and a snapshot of the identity that the worker
//! refreshes whenever the channel changes.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use crate::types::Channel;

/// Worker lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Resolving,
    SocketConnecting,
    Authenticating,
    Joining,
    Streaming,
    Draining,
    Closed,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Resolving,
            2 => Self::SocketConnecting,
            3 => Self::Authenticating,
            4 => Self::Joining,
            5 => Self::Streaming,
            6 => Self::Draining,
            7 => Self::Closed,
            _ => Self::Idle,
        }
    }
}

/// Read-only view of the connection identity
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionInfo {
    #[serde(skip_serializing)]
    pub token: String,
    pub username: String,
    pub channel: Option<Channel>,
}

/// Connection identity (worker-owned)
#[derive(Debug, Clone)]
pub struct Session {
    /// `oauth:...` token sent with PASS
    pub token: String,
    /// Login name, lowercase
    pub username: String,
    /// Currently joined channel
    pub channel: Option<Channel>,
    /// Minimum gap between outbound requests
    pub send_interval: Duration,
}

impl Session {
    /// Create a session; username and channel are lowercased
    pub fn new(token: &str, username: &str, channel: &str, send_interval: Duration) -> Self {
        Self {
            token: token.trim().to_string(),
            username: username.trim().to_lowercase(),
            channel: Channel::parse_optional(channel),
            send_interval,
        }
    }

    /// Replace the joined channel, returning the previous one
    pub fn switch_channel(&mut self, channel: Option<Channel>) -> Option<Channel> {
        std::mem::replace(&mut self.channel, channel)
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            token: self.token.clone(),
            username: self.username.clone(),
            channel: self.channel.clone(),
        }
    }
}

/// State written by one side and read by the other
///
/// The flags are atomics polled every worker cycle. `should_exit` is the
/// only value the host writes.
#[derive(Debug, Default)]
pub struct SharedState {
    should_exit: AtomicBool,
    connected: AtomicBool,
    phase: AtomicU8,
    info: RwLock<ConnectionInfo>,
}

impl SharedState {
    pub fn request_exit(&self) {
        self.should_exit.store(true, Ordering::Release);
    }

    pub fn should_exit(&self) -> bool {
        self.should_exit.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn publish_info(&self, info: ConnectionInfo) {
        *self.info.write() = info;
    }

    pub fn info(&self) -> ConnectionInfo {
        self.info.read().clone()
    }
}
