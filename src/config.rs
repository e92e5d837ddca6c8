//! Connection configuration
//!
//! Every field has a default matching the public Twitch endpoint, so an
//! empty JSON object (or `ClientConfig::default()`) is a working config.
//! Durations are stored as milliseconds to keep the file format plain.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ClientError;

/// Plaintext Twitch IRC endpoint
pub const DEFAULT_HOST: &str = "irc.chat.twitch.tv";

/// Plaintext IRC port (6697 is the TLS port, which is not supported)
pub const DEFAULT_PORT: u16 = 6667;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Requested socket receive buffer size in bytes
    pub receive_buffer_size: u32,
    /// Sleep between streaming cycles
    pub poll_interval_ms: u64,
    /// Sleep between polls while waiting for the welcome numeric
    pub auth_retry_interval_ms: u64,
    /// Number of empty polls before giving up on authentication
    pub auth_attempts: u32,
    /// Send `CAP REQ` for twitch.tv/commands and twitch.tv/tags after login
    pub request_capabilities: bool,
    /// Upper bound for `request_stop(true)`
    pub stop_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            receive_buffer_size: 2 * 1024 * 1024,
            poll_interval_ms: 200,
            auth_retry_interval_ms: 500,
            auth_attempts: 5,
            request_capabilities: true,
            stop_timeout_ms: 5000,
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ClientError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn auth_retry_interval(&self) -> Duration {
        Duration::from_millis(self.auth_retry_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
