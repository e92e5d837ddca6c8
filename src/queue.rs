//! Single-producer single-consumer queues
//!
//! Thin wrappers over `tokio::sync::mpsc::unbounded_channel`. The halves are
//! deliberately not `Clone`: each queue has exactly one producer and one
//! consumer for its whole lifetime. Neither side ever blocks, so the host can
//! use them from plain synchronous code.

use tokio::sync::mpsc;

use crate::error::SendError;

/// Create a connected producer/consumer pair
pub fn spsc<T>() -> (Producer<T>, Consumer<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Producer { tx }, Consumer { rx })
}

/// Producing half
#[derive(Debug)]
pub struct Producer<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Producer<T> {
    /// Append an item
    ///
    /// Fails only once the consumer has been dropped.
    pub fn push(&self, item: T) -> Result<(), SendError> {
        self.tx.send(item).map_err(|_| SendError::ChannelClosed)
    }
}

/// Consuming half
#[derive(Debug)]
pub struct Consumer<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Consumer<T> {
    /// Take the oldest item, if any
    pub fn pop(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Take everything currently queued, oldest first
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.pop() {
            items.push(item);
        }
        items
    }
}
