//! Outbound send pacing
//!
//! The worker loop sleeps a fixed interval per cycle and reports each sleep
//! here. The pacer keeps the accumulated time and the earliest moment the
//! next request may go out, so at most one request leaves per interval no
//! matter how many are queued.

use std::time::Duration;

/// Default gap between outbound requests (safe for non-verified bots)
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(1200);

#[derive(Debug, Clone)]
pub struct SendPacer {
    interval: Duration,
    elapsed: Duration,
    next_send: Duration,
}

impl SendPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            elapsed: Duration::ZERO,
            next_send: Duration::ZERO,
        }
    }

    /// Advance the clock by time spent sleeping
    pub fn advance(&mut self, slept: Duration) {
        self.elapsed += slept;
    }

    /// True when a request may be sent now
    pub fn is_ready(&self) -> bool {
        self.next_send <= self.elapsed
    }

    /// Record a send; the next one waits a full interval
    pub fn mark_sent(&mut self) {
        self.next_send = self.elapsed + self.interval;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}
