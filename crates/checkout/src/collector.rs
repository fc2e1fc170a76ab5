//! Best-effort delivery of paid orders to the external data platform.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// Record sent to the collector for each paid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedOrder {
    pub order_number: String,
    pub total_price: Money,
    pub created_at: DateTime<Utc>,
}

/// Errors that can occur when delivering to the collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Collector request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Collector rejected order {order_number}: HTTP {status}")]
    Rejected { order_number: String, status: u16 },

    #[error("Collector unavailable")]
    Unavailable,
}

/// Outbound seam to the analytics collector.
///
/// Callers never wait on this for correctness; failures are only logged.
#[async_trait]
pub trait OrderCollector: Send + Sync {
    async fn send(&self, order: &CollectedOrder) -> Result<(), CollectorError>;
}

/// Posts orders as JSON to a collector endpoint.
#[derive(Debug, Clone)]
pub struct HttpOrderCollector {
    client: reqwest::Client,
    url: String,
}

impl HttpOrderCollector {
    /// Creates a collector whose requests give up after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CollectorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl OrderCollector for HttpOrderCollector {
    #[tracing::instrument(skip(self, order), fields(order_number = %order.order_number))]
    async fn send(&self, order: &CollectedOrder) -> Result<(), CollectorError> {
        let response = self.client.post(&self.url).json(order).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::Rejected {
                order_number: order.order_number.clone(),
                status: status.as_u16(),
            });
        }
        tracing::debug!("order delivered to collector");
        Ok(())
    }
}

/// Collector that only logs, used when no endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCollector;

#[async_trait]
impl OrderCollector for LoggingCollector {
    async fn send(&self, order: &CollectedOrder) -> Result<(), CollectorError> {
        tracing::info!(
            order_number = %order.order_number,
            total_price = %order.total_price,
            created_at = %order.created_at,
            "order collected"
        );
        Ok(())
    }
}

#[derive(Default)]
struct CollectorState {
    sent: Vec<CollectedOrder>,
    fail: bool,
}

/// In-memory collector for testing.
#[derive(Clone, Default)]
pub struct InMemoryCollector {
    state: Arc<RwLock<CollectorState>>,
}

impl InMemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every delivery fail until reset.
    pub async fn set_fail(&self, fail: bool) {
        self.state.write().await.fail = fail;
    }

    pub async fn sent(&self) -> Vec<CollectedOrder> {
        self.state.read().await.sent.clone()
    }
}

#[async_trait]
impl OrderCollector for InMemoryCollector {
    async fn send(&self, order: &CollectedOrder) -> Result<(), CollectorError> {
        let mut state = self.state.write().await;
        if state.fail {
            return Err(CollectorError::Unavailable);
        }
        state.sent.push(order.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn order() -> CollectedOrder {
        CollectedOrder {
            order_number: "20240101120000-000001".to_string(),
            total_price: Money::new(1000),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let value = serde_json::to_value(order()).unwrap();
        assert_eq!(value["orderNumber"], "20240101120000-000001");
        assert_eq!(value["totalPrice"], 1000);
        assert!(value.get("createdAt").is_some());
    }

    #[tokio::test]
    async fn in_memory_collector_records_or_fails() {
        let collector = InMemoryCollector::new();
        collector.send(&order()).await.unwrap();
        assert_eq!(collector.sent().await.len(), 1);

        collector.set_fail(true).await;
        assert!(matches!(
            collector.send(&order()).await,
            Err(CollectorError::Unavailable)
        ));
        assert_eq!(collector.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn http_collector_reports_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let collector =
            HttpOrderCollector::new(format!("http://{addr}/orders"), Duration::from_millis(500))
                .unwrap();
        assert!(matches!(
            collector.send(&order()).await,
            Err(CollectorError::Request(_))
        ));
    }

    #[tokio::test]
    async fn http_collector_times_out_on_silent_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let collector =
            HttpOrderCollector::new(format!("http://{addr}/orders"), Duration::from_millis(100))
                .unwrap();
        let result = collector.send(&order()).await;
        assert!(matches!(result, Err(CollectorError::Request(ref e)) if e.is_timeout()));

        server.abort();
    }

    #[tokio::test]
    async fn logging_collector_always_succeeds() {
        assert!(LoggingCollector.send(&order()).await.is_ok());
    }
}
