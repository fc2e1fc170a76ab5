//! Outbox relay.
//!
//! Payments write an [`OutboxEntry`](store::OutboxEntry) in the same local
//! transaction as the payment row. The [`OutboxRelay`] picks those entries up
//! independently of any request, publishes them through a
//! [`MessagePublisher`] and records the outcome. Delivery is at-least-once;
//! consumers can filter repeats with a [`Deduplicator`].

pub mod dedup;
pub mod error;
pub mod message;
pub mod publisher;
pub mod relay;

pub use dedup::{DedupKey, Deduplicator};
pub use error::{OutboxError, Result};
pub use message::OutboxMessage;
pub use publisher::{InMemoryPublisher, LogPublisher, MessagePublisher, PublishedMessage};
pub use relay::{OutboxRelay, RelayConfig, RelayReport};
