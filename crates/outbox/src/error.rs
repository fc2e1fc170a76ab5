use store::StoreError;
use thiserror::Error;

/// Errors that can occur while relaying outbox entries.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The broker did not acknowledge a message.
    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// Reading or updating outbox rows failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The message could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OutboxError {
    pub fn publish(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        OutboxError::Publish {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
