//! Broadcast hubs backing the engine's observable streams.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio::time::timeout;

/// Multi-subscriber broadcast of engine events.
///
/// Slow subscribers lag rather than block the engine; lagged events are
/// counted and skipped. After [`close`](Hub::close) the hub publishes
/// nothing and streams end.
#[derive(Debug)]
pub struct Hub<T> {
    sender: RwLock<Option<Sender<T>>>,
    dropped: AtomicUsize,
    capacity: usize,
}

impl<T: Clone> Hub<T> {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Arc::new(Hub {
            sender: RwLock::new(Some(sender)),
            dropped: AtomicUsize::new(0),
            capacity,
        })
    }

    /// Publishes to all current subscribers; a hub with no subscribers
    /// silently discards.
    pub fn publish(&self, value: T) {
        let maybe_sender = {
            let guard = self.sender.read();
            guard.as_ref().cloned()
        };
        if let Some(sender) = maybe_sender {
            let _ = sender.send(value);
        }
    }

    pub fn subscribe(self: &Arc<Self>) -> HubStream<T> {
        let receiver = {
            let guard = self.sender.read();
            guard.as_ref().map(|s| s.subscribe())
        };
        let receiver = receiver.unwrap_or_else(|| {
            // Hub already closed: hand out an immediately ended stream.
            let (sender, receiver) = broadcast::channel(1);
            drop(sender);
            receiver
        });
        HubStream {
            receiver,
            hub: Arc::clone(self),
        }
    }

    pub fn close(&self) {
        let _ = self.sender.write().take();
    }

    /// Total events lost to lagging subscribers.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Subscriber handle to a [`Hub`].
#[derive(Debug)]
pub struct HubStream<T> {
    receiver: Receiver<T>,
    hub: Arc<Hub<T>>,
}

impl<T: Clone> HubStream<T> {
    /// Next event; `None` once the hub is closed. Lagged events are
    /// counted against the hub and skipped.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.hub.dropped.fetch_add(missed as usize, Ordering::Relaxed);
                    tracing::warn!(missed, "observer stream lagged; dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when empty or
    /// closed.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(value) => return Some(value),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    self.hub.dropped.fetch_add(missed as usize, Ordering::Relaxed);
                }
                Err(_) => return None,
            }
        }
    }

    /// As [`recv`](Self::recv), bounded by `duration`.
    pub async fn next_timeout(&mut self, duration: Duration) -> Option<T> {
        timeout(duration, self.recv()).await.ok().flatten()
    }
}
