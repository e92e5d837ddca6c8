//! Basic type definitions for the chat runner
//!
//! Provides newtype wrappers for type safety:
//! - `SessionId`: UUID-based identifier for one runner instance
//! - `Channel`: lowercased channel name without the leading `#`
//! - `Rgb`: user color carried by the `color` tag

use serde::Serialize;
use uuid::Uuid;

/// Unique runner identifier (newtype pattern)
///
/// Wraps a UUID v4. Used to name the worker thread and tag log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, short enough for a thread name
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel name (lowercase, no `#` prefix)
///
/// Twitch channel names are the broadcaster's login, which the server
/// only accepts in lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Channel(pub String);

impl Channel {
    /// Create a Channel from user input (trims, drops a leading `#`, lowercases)
    ///
    /// The name ends at the first character a channel name cannot hold
    /// (whitespace, comma, control), so the result always fits in a single
    /// protocol parameter.
    pub fn from_string(name: &str) -> Self {
        let name = name.trim();
        let name = name.strip_prefix('#').unwrap_or(name);
        let end = name.find(is_name_break).unwrap_or(name.len());
        Self(name[..end].to_lowercase())
    }

    /// Like `from_string`, but an empty name becomes `None`
    pub fn parse_optional(name: &str) -> Option<Self> {
        let channel = Self::from_string(name);
        if channel.is_empty() {
            None
        } else {
            Some(channel)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_name_break(c: char) -> bool {
    c.is_whitespace() || c.is_control() || c == ','
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Parse `#RRGGBB` or `RRGGBB`
    ///
    /// Returns None for anything else, including the empty string Twitch
    /// sends for users who never picked a color.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        Some(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }
}
