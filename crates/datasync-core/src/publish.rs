//! Downstream notification publishing.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::BackendError;

/// Fire-and-forget channel to downstream consumers.
///
/// A successful return means the message was handed to the transport, not
/// that any consumer received it.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BackendError>;
}

/// A message captured by [`MemoryPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
}

/// Publisher that queues messages in memory until drained.
#[derive(Default)]
pub struct MemoryPublisher {
    queue: Mutex<Vec<PublishedMessage>>,
    unavailable: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued message.
    pub fn drain(&self) -> Vec<PublishedMessage> {
        std::mem::take(&mut *self.queue.lock())
    }

    /// Copy of the queued messages, leaving them in place.
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.queue.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Simulate a broker outage. While set, every publish fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationPublisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::new("publisher unavailable"));
        }

        self.queue.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }
}
