//! Outbox records written alongside business changes.

use chrono::{DateTime, Utc};
use common::OutboxId;
use serde::{Deserialize, Serialize};

use crate::{Result, StoreError};

/// Delivery status of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    /// Written, not yet published.
    Init,
    /// Acknowledged by the broker.
    Sent,
    /// Last publish attempt failed.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Init => "INIT",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "INIT" => Ok(OutboxStatus::Init),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(StoreError::Corrupt(format!(
                "unknown outbox status '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event waiting to be relayed to the message broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Creates an `INIT` entry with `event` serialized as the payload.
    pub fn new<E: Serialize>(
        aggregate_type: impl Into<String>,
        aggregate_id: impl ToString,
        event_type: impl Into<String>,
        event: &E,
    ) -> std::result::Result<Self, serde_json::Error> {
        let now = Utc::now();
        Ok(Self {
            id: OutboxId::new(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.to_string(),
            event_type: event_type.into(),
            payload: serde_json::to_value(event)?,
            status: OutboxStatus::Init,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Consumer de-duplication key.
    pub fn dedup_key(&self) -> (String, String, String) {
        (
            self.aggregate_type.clone(),
            self.aggregate_id.clone(),
            self.event_type.clone(),
        )
    }
}
