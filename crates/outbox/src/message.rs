use serde::{Deserialize, Serialize};
use store::{OutboxEntry, OutboxStatus};

use crate::Result;

/// Wire shape of a relayed event.
///
/// Serialized as
/// `{"aggregateType", "aggregateId", "eventType", "payload", "status"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxMessage {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
}

impl OutboxMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<&OutboxEntry> for OutboxMessage {
    fn from(entry: &OutboxEntry) -> Self {
        Self {
            aggregate_type: entry.aggregate_type.clone(),
            aggregate_id: entry.aggregate_id.clone(),
            event_type: entry.event_type.clone(),
            payload: entry.payload.clone(),
            status: entry.status,
        }
    }
}
