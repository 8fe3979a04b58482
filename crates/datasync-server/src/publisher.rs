//! NNG publisher for dimension notifications.
//!
//! Each message is framed as `{topic}\n{payload}` so subscribers can filter
//! on the topic prefix with a plain NNG subscription.

use async_trait::async_trait;
use nng::{Message, Protocol, Socket};

use datasync_core::{BackendError, NotificationPublisher};

use crate::error::Error;

/// Frame a payload for the given topic.
pub fn encode_frame(topic: &str, payload: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(topic.len() + 1 + payload.len());
    frame.extend_from_slice(topic.as_bytes());
    frame.push(b'\n');
    frame.extend_from_slice(payload.as_bytes());
    frame
}

/// Split a frame back into topic and payload.
pub fn decode_frame(frame: &[u8]) -> Option<(&str, &str)> {
    let split = frame.iter().position(|b| *b == b'\n')?;
    let topic = std::str::from_utf8(&frame[..split]).ok()?;
    let payload = std::str::from_utf8(&frame[split + 1..]).ok()?;
    Some((topic, payload))
}

/// Publishes notifications on an NNG PUB socket.
pub struct NngPublisher {
    socket: Socket,
    address: String,
}

impl NngPublisher {
    /// Open a PUB socket listening on `address`.
    pub fn listen(address: &str) -> Result<Self, Error> {
        let socket = Socket::new(Protocol::Pub0)
            .map_err(|e| Error::Transport(format!("failed to create pub socket: {}", e)))?;

        socket
            .listen(address)
            .map_err(|e| Error::Transport(format!("failed to listen on {}: {}", address, e)))?;

        tracing::info!(address = %address, "publishing notifications");

        Ok(Self {
            socket,
            address: address.to_string(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl NotificationPublisher for NngPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BackendError> {
        let socket = self.socket.clone();
        let message = Message::from(encode_frame(topic, payload).as_slice());

        tokio::task::spawn_blocking(move || socket.send(message))
            .await
            .map_err(|e| BackendError::new(format!("publish task failed: {}", e)))?
            .map_err(|(_, e)| BackendError::new(format!("nng send failed: {}", e)))
    }
}
