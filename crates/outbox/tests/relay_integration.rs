//! Relay behaviour against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{BuyerId, Money, OrderId, PaymentId};
use outbox::{Deduplicator, InMemoryPublisher, OutboxRelay, RelayConfig};
use store::{
    InMemoryStore, Order, OrderStore, OutboxEntry, OutboxStatus, OutboxStore, Payment,
    PaymentStore,
};
use tokio::sync::watch;

async fn pay(store: &InMemoryStore, amount: i64) -> Payment {
    let order = Order {
        id: OrderId::new(),
        order_number: "20240101000000-000001".to_string(),
        buyer_id: BuyerId::new(1),
        buyer_name: "kim".to_string(),
        total_quantity: 1,
        total_price: Money::new(amount),
        created_at: Utc::now(),
        items: vec![],
    };
    store.insert_order(&order).await.unwrap();

    let payment = Payment {
        id: PaymentId::new(),
        order_id: order.id,
        buyer_id: order.buyer_id,
        amount: order.total_price,
        paid_at: Utc::now(),
    };
    let entry = OutboxEntry::new("Payment", payment.id, "orderPaymentComplete", &payment).unwrap();
    store.commit_payment(&payment, &entry).await.unwrap();
    payment
}

fn fast_config() -> RelayConfig {
    RelayConfig {
        poll_interval: Duration::from_millis(10),
        sweep_interval: Duration::from_millis(25),
        ..RelayConfig::default()
    }
}

async fn wait_until_sent(store: &InMemoryStore, payment: &Payment) {
    for _ in 0..200 {
        let entries = store
            .find_by_aggregate("Payment", &payment.id.to_string())
            .await
            .unwrap();
        if entries.iter().all(|entry| entry.status == OutboxStatus::Sent) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("outbox entry for payment {} was never sent", payment.id);
}

#[tokio::test]
async fn background_relay_delivers_committed_payments() {
    let store = InMemoryStore::new();
    let publisher = InMemoryPublisher::new();
    let relay = Arc::new(OutboxRelay::new(
        store.clone(),
        publisher.clone(),
        fast_config(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move { relay.run(shutdown_rx).await })
    };

    let payment = pay(&store, 1000).await;
    wait_until_sent(&store, &payment).await;

    shutdown_tx.send(true).unwrap();
    worker.await.unwrap();

    let published = publisher.published().await;
    assert_eq!(published.len(), 1);
    let message = published[0].message().unwrap();
    assert_eq!(message.aggregate_type, "Payment");
    assert_eq!(message.aggregate_id, payment.id.to_string());
    assert_eq!(message.event_type, "orderPaymentComplete");
}

#[tokio::test]
async fn broker_outage_is_recovered_by_the_sweep() {
    let store = InMemoryStore::new();
    let publisher = InMemoryPublisher::new();
    publisher.set_fail(true).await;

    let relay = Arc::new(OutboxRelay::new(
        store.clone(),
        publisher.clone(),
        RelayConfig {
            max_attempts: 1000,
            ..fast_config()
        },
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move { relay.run(shutdown_rx).await })
    };

    let payment = pay(&store, 500).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let entries = store
        .find_by_aggregate("Payment", &payment.id.to_string())
        .await
        .unwrap();
    assert_eq!(entries[0].status, OutboxStatus::Failed);

    publisher.set_fail(false).await;
    wait_until_sent(&store, &payment).await;

    shutdown_tx.send(true).unwrap();
    worker.await.unwrap();
    assert_eq!(publisher.published().await.len(), 1);
}

#[tokio::test]
async fn relay_stops_when_shutdown_sender_is_dropped() {
    let store = InMemoryStore::new();
    let relay = OutboxRelay::new(store, InMemoryPublisher::new(), fast_config());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = tokio::spawn(async move { relay.run(shutdown_rx).await });
    drop(shutdown_tx);

    tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .expect("relay did not stop")
        .unwrap();
}

#[tokio::test]
async fn consumers_filter_redelivered_events() {
    let store = InMemoryStore::new();
    let publisher = InMemoryPublisher::new();
    let relay = OutboxRelay::new(store.clone(), publisher.clone(), RelayConfig::default());

    let payment = pay(&store, 1000).await;
    relay.run_once().await.unwrap();

    // At-least-once: the sweep republishes an entry whose acknowledgment
    // was lost, so the broker sees the same event twice.
    let entry = store.fetch_unsent(10).await.unwrap();
    assert!(entry.is_empty());
    let sent = store
        .find_by_aggregate("Payment", &payment.id.to_string())
        .await
        .unwrap();
    store.mark_failed(sent[0].id, "ack lost").await.unwrap();
    relay.sweep_failed().await.unwrap();

    let deliveries = publisher.published().await;
    assert_eq!(deliveries.len(), 2);

    let dedup = Deduplicator::new();
    let mut handled = 0;
    for delivery in &deliveries {
        if dedup.accept(&delivery.message().unwrap()).await {
            handled += 1;
        }
    }
    assert_eq!(handled, 1);
}
