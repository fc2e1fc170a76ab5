use std::time::Duration;

use futures_util::{StreamExt, stream};
use store::{OutboxEntry, OutboxStore};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::{MessagePublisher, OutboxMessage, Result};

/// Relay scheduling and delivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Interval between polls for `INIT` entries.
    pub poll_interval: Duration,
    /// Interval between sweeps of `FAILED` entries.
    pub sweep_interval: Duration,
    /// Maximum entries fetched per poll or sweep.
    pub batch_size: usize,
    /// Entries that failed this many times are left alone by the sweep.
    pub max_attempts: u32,
    /// Broker topic every entry is published to.
    pub topic: String,
    /// Maximum publishes in flight at once.
    pub concurrency: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(30),
            batch_size: 100,
            max_attempts: 5,
            topic: "order_events_topic".to_string(),
            concurrency: 8,
        }
    }
}

/// Outcome of one poll or sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub sent: usize,
    pub failed: usize,
}

impl RelayReport {
    pub fn processed(&self) -> usize {
        self.sent + self.failed
    }
}

/// Publishes committed outbox entries and tracks their delivery status.
///
/// The relay never runs inside a request: the payment workflow only writes
/// the entry, and the relay picks it up on its next poll.
pub struct OutboxRelay<S: OutboxStore, P: MessagePublisher> {
    store: S,
    publisher: P,
    config: RelayConfig,
}

impl<S: OutboxStore, P: MessagePublisher> OutboxRelay<S, P> {
    pub fn new(store: S, publisher: P, config: RelayConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Publishes one batch of `INIT` entries.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<RelayReport> {
        let entries = self.store.fetch_unsent(self.config.batch_size).await?;
        self.deliver_all(entries).await
    }

    /// Republishes one batch of `FAILED` entries that still have attempts left.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_failed(&self) -> Result<RelayReport> {
        let entries = self
            .store
            .fetch_retryable(self.config.batch_size, self.config.max_attempts)
            .await?;
        let report = self.deliver_all(entries).await?;
        if report.processed() > 0 {
            tracing::info!(
                sent = report.sent,
                failed = report.failed,
                "failed outbox entries swept"
            );
        }
        Ok(report)
    }

    /// Polls and sweeps on their intervals until `shutdown` flips to true or
    /// its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(topic = %self.config.topic, "outbox relay started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "outbox poll failed");
                    }
                }
                _ = sweep.tick() => {
                    if let Err(e) = self.sweep_failed().await {
                        tracing::error!(error = %e, "outbox sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("outbox relay stopped");
    }

    async fn deliver_all(&self, entries: Vec<OutboxEntry>) -> Result<RelayReport> {
        let outcomes: Vec<Result<bool>> = stream::iter(entries)
            .map(|entry| self.deliver(entry))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = RelayReport::default();
        for outcome in outcomes {
            if outcome? {
                report.sent += 1;
            } else {
                report.failed += 1;
            }
        }
        Ok(report)
    }

    /// Returns whether the entry was acknowledged. Only store failures are
    /// errors; a rejected publish is recorded on the entry.
    #[tracing::instrument(
        skip(self, entry),
        fields(outbox_id = %entry.id, aggregate_id = %entry.aggregate_id, event_type = %entry.event_type)
    )]
    async fn deliver(&self, entry: OutboxEntry) -> Result<bool> {
        let published = match OutboxMessage::from(&entry).to_bytes() {
            Ok(body) => {
                self.publisher
                    .publish(&self.config.topic, &entry.aggregate_id, &body)
                    .await
            }
            Err(e) => Err(e),
        };

        match published {
            Ok(()) => {
                self.store.mark_sent(entry.id).await?;
                metrics::counter!("outbox_published_total").increment(1);
                tracing::info!("outbox entry sent");
                Ok(true)
            }
            Err(e) => {
                self.store.mark_failed(entry.id, &e.to_string()).await?;
                metrics::counter!("outbox_publish_failures_total").increment(1);
                tracing::error!(
                    error = %e,
                    attempts = entry.attempts + 1,
                    "outbox publish failed"
                );
                Ok(false)
            }
        }
    }
}
