use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{OutboxError, OutboxMessage, Result};

/// Broker seam used by the relay.
///
/// `Ok` means the broker acknowledged the message.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, body: &[u8]) -> Result<()>;
}

/// A message captured by [`InMemoryPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub body: Vec<u8>,
}

impl PublishedMessage {
    pub fn message(&self) -> Result<OutboxMessage> {
        OutboxMessage::from_bytes(&self.body)
    }
}

#[derive(Default)]
struct PublisherState {
    published: Vec<PublishedMessage>,
    fail: bool,
}

/// Publisher that records messages in memory, for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryPublisher {
    state: Arc<RwLock<PublisherState>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail until reset, as an unreachable broker would.
    pub async fn set_fail(&self, fail: bool) {
        self.state.write().await.fail = fail;
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.state.read().await.published.clone()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, key: &str, body: &[u8]) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail {
            return Err(OutboxError::publish(topic, "broker unavailable"));
        }
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            body: body.to_vec(),
        });
        Ok(())
    }
}

/// Publisher that writes each message to the log and acknowledges it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

#[async_trait]
impl MessagePublisher for LogPublisher {
    async fn publish(&self, topic: &str, key: &str, body: &[u8]) -> Result<()> {
        tracing::info!(
            topic,
            key,
            body = %String::from_utf8_lossy(body),
            "message published"
        );
        Ok(())
    }
}
