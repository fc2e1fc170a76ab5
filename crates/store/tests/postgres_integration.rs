//! PostgreSQL store integration tests.
//!
//! These tests need a Docker daemon. Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{BuyerId, CartLineId, Money, OptionId, OrderId, OrderSheetId, PaymentId, ProductId};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    BalanceChange, BalanceLedger, InventoryStore, ItemStatus, LineItem, Order, OrderItem,
    OrderItemSheet, OrderSheet, OrderSheetStore, OrderStore, OutboxEntry, OutboxStatus,
    OutboxStore, Payment, PaymentStore, PostgresStore, StoreError,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_store() -> PostgresStore {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    let store = PostgresStore::new(pool);
    store.run_migrations().await.unwrap();
    clear(store.pool()).await;
    store
}

async fn clear(pool: &PgPool) {
    sqlx::query(
        "TRUNCATE TABLE order_item_sheets, order_sheets, payments, order_items, orders, outbox, \
         product_stock, product_options, products, balance_history, balances",
    )
    .execute(pool)
    .await
    .unwrap();
}

fn sheet_for(buyer: i64, lines: Vec<LineItem>) -> OrderSheet {
    let now = Utc::now();
    let (total_quantity, total_price) = store::model::totals(&lines).unwrap();
    OrderSheet {
        id: OrderSheetId::new(),
        buyer_id: BuyerId::new(buyer),
        buyer_name: "kim".to_string(),
        total_quantity,
        total_price,
        cart_line_ids: vec![CartLineId::new(1), CartLineId::new(2)],
        created_at: now,
        expires_at: now + Duration::hours(3),
        items: lines
            .into_iter()
            .map(|line| OrderItemSheet {
                line,
                status: ItemStatus::Waiting,
            })
            .collect(),
    }
}

fn order_for(buyer: i64) -> Order {
    let lines = vec![
        LineItem::new(ProductId::new(1), "Keyboard", Money::new(1000), 2),
        LineItem::new(ProductId::new(2), "Mouse", Money::new(500), 1)
            .with_option(OptionId::new(20), "Black"),
    ];
    let (total_quantity, total_price) = store::model::totals(&lines).unwrap();
    let created_at = Utc::now();
    let id = OrderId::new();
    Order {
        id,
        order_number: format!("{}-{id}", created_at.format("%Y%m%d%H%M%S")),
        buyer_id: BuyerId::new(buyer),
        buyer_name: "kim".to_string(),
        total_quantity,
        total_price,
        created_at,
        items: lines
            .into_iter()
            .map(|line| OrderItem {
                line,
                status: ItemStatus::Waiting,
            })
            .collect(),
    }
}

fn payment_for(order: &Order) -> (Payment, OutboxEntry) {
    let payment = Payment {
        id: PaymentId::new(),
        order_id: order.id,
        buyer_id: order.buyer_id,
        amount: order.total_price,
        paid_at: Utc::now(),
    };
    let outbox = OutboxEntry::new("Payment", payment.id, "orderPaymentComplete", &payment).unwrap();
    (payment, outbox)
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn sheet_round_trip_keeps_item_order() {
    let store = get_store().await;
    let sheet = sheet_for(
        1,
        vec![
            LineItem::new(ProductId::new(3), "Cable", Money::new(300), 1),
            LineItem::new(ProductId::new(1), "Keyboard", Money::new(1000), 2),
        ],
    );

    store.save_sheet(&sheet).await.unwrap();

    let loaded = store.find_sheet(sheet.id).await.unwrap().unwrap();
    assert_eq!(loaded.items.len(), 2);
    assert_eq!(loaded.items[0].line.product_id, ProductId::new(3));
    assert_eq!(loaded.cart_line_ids, sheet.cart_line_ids);
    assert_eq!(loaded.total_price, Money::new(2300));

    let by_buyer = store.find_sheet_by_buyer(BuyerId::new(1)).await.unwrap();
    assert_eq!(by_buyer.map(|s| s.id), Some(sheet.id));
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn saving_a_sheet_replaces_the_buyers_previous_one() {
    let store = get_store().await;
    let first = sheet_for(1, vec![LineItem::new(ProductId::new(1), "A", Money::new(10), 1)]);
    let second = sheet_for(1, vec![LineItem::new(ProductId::new(2), "B", Money::new(20), 1)]);

    store.save_sheet(&first).await.unwrap();
    store.save_sheet(&second).await.unwrap();

    assert!(store.find_sheet(first.id).await.unwrap().is_none());
    assert!(store.find_sheet(second.id).await.unwrap().is_some());

    assert!(store.delete_sheet(second.id).await.unwrap());
    assert!(!store.delete_sheet(second.id).await.unwrap());
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn orders_are_scoped_to_their_buyer() {
    let store = get_store().await;
    let order = order_for(7);
    store.insert_order(&order).await.unwrap();

    let loaded = store
        .find_order(BuyerId::new(7), order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.order_number, order.order_number);
    assert_eq!(loaded.items, order.items);
    assert_eq!(loaded.total_price, Money::new(2500));

    let foreign = store.find_order(BuyerId::new(8), order.id).await.unwrap();
    assert!(foreign.is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn commit_payment_is_atomic_and_unique_per_order() {
    let store = get_store().await;
    let order = order_for(7);
    store.insert_order(&order).await.unwrap();

    let (payment, outbox) = payment_for(&order);
    store.commit_payment(&payment, &outbox).await.unwrap();

    let paid = store
        .find_order(order.buyer_id, order.id)
        .await
        .unwrap()
        .unwrap();
    assert!(paid.is_paid());
    let stored = store.find_payment_by_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.id, payment.id);
    assert_eq!(stored.amount, order.total_price);

    let entries = store
        .find_by_aggregate("Payment", &payment.id.to_string())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, OutboxStatus::Init);

    // A second payment rolls back entirely, outbox row included.
    let (again, again_outbox) = payment_for(&order);
    let result = store.commit_payment(&again, &again_outbox).await;
    assert!(matches!(result, Err(StoreError::PaymentAlreadyExists(id)) if id == order.id));
    let entries = store
        .find_by_aggregate("Payment", &again.id.to_string())
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn commit_payment_for_unknown_order_fails() {
    let store = get_store().await;
    let order = order_for(7);
    let (payment, outbox) = payment_for(&order);

    let result = store.commit_payment(&payment, &outbox).await;
    assert!(matches!(result, Err(StoreError::OrderNotFound(_))));
    assert!(store.fetch_unsent(10).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn outbox_status_transitions() {
    let store = get_store().await;
    let order = order_for(7);
    store.insert_order(&order).await.unwrap();
    let (payment, outbox) = payment_for(&order);
    store.commit_payment(&payment, &outbox).await.unwrap();

    let unsent = store.fetch_unsent(10).await.unwrap();
    assert_eq!(unsent.len(), 1);

    store.mark_failed(outbox.id, "broker down").await.unwrap();
    assert!(store.fetch_unsent(10).await.unwrap().is_empty());
    let retryable = store.fetch_retryable(10, 5).await.unwrap();
    assert_eq!(retryable.len(), 1);
    assert_eq!(retryable[0].attempts, 1);
    assert_eq!(retryable[0].last_error.as_deref(), Some("broker down"));
    assert!(store.fetch_retryable(10, 1).await.unwrap().is_empty());

    store.mark_sent(outbox.id).await.unwrap();
    let entries = store
        .find_by_aggregate("Payment", &payment.id.to_string())
        .await
        .unwrap();
    assert_eq!(entries[0].status, OutboxStatus::Sent);
    assert!(entries[0].last_error.is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn inventory_validates_and_deducts() {
    let store = get_store().await;
    store.add_product(ProductId::new(1), 5).await.unwrap();
    store
        .add_option(ProductId::new(2), OptionId::new(20), 3)
        .await
        .unwrap();

    store.validate(ProductId::new(1), None).await.unwrap();
    assert!(matches!(
        store.validate(ProductId::new(99), None).await,
        Err(StoreError::ProductNotFound(_))
    ));
    assert!(matches!(
        store.validate(ProductId::new(2), Some(OptionId::new(21))).await,
        Err(StoreError::OptionNotFound { .. })
    ));

    store.deduct(ProductId::new(1), None, 4).await.unwrap();
    let result = store.deduct(ProductId::new(1), None, 2).await;
    assert!(matches!(
        result,
        Err(StoreError::InsufficientStock {
            requested: 2,
            available: 1,
            ..
        })
    ));

    store
        .restock(ProductId::new(1), None, 4)
        .await
        .unwrap();
    assert_eq!(store.stock(ProductId::new(1), None).await.unwrap(), 5);

    store
        .deduct(ProductId::new(2), Some(OptionId::new(20)), 3)
        .await
        .unwrap();
    assert_eq!(
        store
            .stock(ProductId::new(2), Some(OptionId::new(20)))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn concurrent_deductions_never_oversell() {
    let store = get_store().await;
    store.add_product(ProductId::new(1), 10).await.unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.deduct(ProductId::new(1), None, 1).await })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 10);
    assert_eq!(store.stock(ProductId::new(1), None).await.unwrap(), 0);
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn balance_ledger_records_history() {
    let store = get_store().await;
    let buyer = BuyerId::new(3);

    assert_eq!(store.balance(buyer).await.unwrap(), Money::zero());
    store
        .credit(buyer, Money::new(5000), BalanceChange::Charge)
        .await
        .unwrap();
    let after = store.debit(buyer, Money::new(2000)).await.unwrap();
    assert_eq!(after, Money::new(3000));

    let result = store.debit(buyer, Money::new(4000)).await;
    assert!(matches!(
        result,
        Err(StoreError::InsufficientBalance { available, .. }) if available == Money::new(3000)
    ));

    let history = store.history(buyer).await.unwrap();
    let kinds: Vec<_> = history.iter().map(|row| row.kind).collect();
    assert_eq!(kinds, vec![BalanceChange::Charge, BalanceChange::Use]);
    assert_eq!(history[1].balance_after, Money::new(3000));
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn credit_past_the_largest_balance_is_rejected() {
    let store = get_store().await;
    let buyer = BuyerId::new(4);

    store
        .credit(buyer, Money::new(i64::MAX), BalanceChange::Charge)
        .await
        .unwrap();
    let result = store
        .credit(buyer, Money::new(1), BalanceChange::Charge)
        .await;

    assert!(matches!(result, Err(StoreError::Overflow(_))));
    assert_eq!(store.balance(buyer).await.unwrap(), Money::new(i64::MAX));
    assert_eq!(store.history(buyer).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn duplicate_order_number_is_reported() {
    let store = get_store().await;
    let first = order_for(7);
    store.insert_order(&first).await.unwrap();

    let mut second = order_for(8);
    second.order_number = first.order_number.clone();
    let result = store.insert_order(&second).await;

    assert!(matches!(
        result,
        Err(StoreError::DuplicateOrderNumber(number)) if number == first.order_number
    ));
    assert!(store.find_order(BuyerId::new(8), second.id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
#[ignore = "requires a Docker daemon"]
async fn concurrent_first_stages_for_a_buyer_keep_one_sheet() {
    let store = get_store().await;

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            let sheet = sheet_for(
                5,
                vec![LineItem::new(ProductId::new(i + 1), "Widget", Money::new(100), 1)],
            );
            tokio::spawn(async move { store.save_sheet(&sheet).await })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_sheets WHERE buyer_id = $1")
        .bind(5_i64)
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);

    let sheet = store
        .find_sheet_by_buyer(BuyerId::new(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sheet.items.len(), 1);
}
