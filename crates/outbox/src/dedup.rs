//! Consumer-side filtering of repeated deliveries.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::OutboxMessage;

/// Identity of an event for de-duplication purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
}

impl From<&OutboxMessage> for DedupKey {
    fn from(message: &OutboxMessage) -> Self {
        Self {
            aggregate_type: message.aggregate_type.clone(),
            aggregate_id: message.aggregate_id.clone(),
            event_type: message.event_type.clone(),
        }
    }
}

#[derive(Default)]
struct Seen {
    keys: HashSet<DedupKey>,
    order: VecDeque<DedupKey>,
}

/// Remembers which events were already handled.
///
/// With a capacity, the oldest keys are forgotten first once the limit is
/// reached. Clones share the same memory.
#[derive(Clone, Default)]
pub struct Deduplicator {
    seen: Arc<Mutex<Seen>>,
    capacity: Option<usize>,
}

impl Deduplicator {
    /// Creates an unbounded de-duplicator.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: Arc::default(),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Returns true the first time a message's key is seen and records it.
    pub async fn accept(&self, message: &OutboxMessage) -> bool {
        let key = DedupKey::from(message);
        let mut seen = self.seen.lock().await;
        if seen.keys.contains(&key) {
            return false;
        }

        if let Some(capacity) = self.capacity {
            while seen.order.len() >= capacity {
                match seen.order.pop_front() {
                    Some(oldest) => {
                        seen.keys.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
        seen.keys.insert(key.clone());
        seen.order.push_back(key);
        true
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.keys.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
