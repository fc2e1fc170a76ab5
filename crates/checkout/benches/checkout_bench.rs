use std::sync::Arc;

use checkout::{
    CoordinatorConfig, CreateOrderRequest, InMemoryCollector, OrderPaymentCoordinator,
    StageRequest,
};
use common::{BuyerId, CartLineId, Money, ProductId};
use criterion::{Criterion, criterion_group, criterion_main};
use lock::{InMemoryLockManager, LockManager, LockOptions};
use store::{InMemoryStore, LineItem};

type Coordinator =
    OrderPaymentCoordinator<InMemoryStore, InMemoryStore, InMemoryStore, InMemoryLockManager>;

async fn make_coordinator() -> Coordinator {
    let store = InMemoryStore::new();
    store.add_product(ProductId::new(1), u32::MAX).await;
    store.add_product(ProductId::new(2), u32::MAX).await;
    OrderPaymentCoordinator::new(
        store.clone(),
        store.clone(),
        store,
        InMemoryLockManager::new(),
        Arc::new(InMemoryCollector::new()),
        CoordinatorConfig::default(),
    )
}

fn stage_request(buyer: i64) -> StageRequest {
    StageRequest {
        buyer_id: BuyerId::new(buyer),
        buyer_name: "bench".to_string(),
        cart_line_ids: vec![CartLineId::new(1), CartLineId::new(2)],
        lines: vec![
            LineItem::new(ProductId::new(1), "Keyboard", Money::new(300), 2),
            LineItem::new(ProductId::new(2), "Mouse", Money::new(400), 1),
        ],
    }
}

async fn create_order(coordinator: &Coordinator, buyer: i64) -> common::OrderId {
    let sheet = coordinator
        .stage_order_sheet(stage_request(buyer))
        .await
        .unwrap();
    coordinator
        .create_order(CreateOrderRequest {
            sheet_id: sheet.id,
            buyer_id: BuyerId::new(buyer),
            items: vec![],
        })
        .await
        .unwrap()
}

fn bench_stage_order_sheet(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coordinator = rt.block_on(make_coordinator());
    let mut buyer = 0;

    c.bench_function("checkout/stage_order_sheet", |b| {
        b.iter(|| {
            buyer += 1;
            rt.block_on(async {
                coordinator
                    .stage_order_sheet(stage_request(buyer))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_create_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coordinator = rt.block_on(make_coordinator());
    let mut buyer = 0;

    c.bench_function("checkout/create_order", |b| {
        b.iter(|| {
            buyer += 1;
            rt.block_on(create_order(&coordinator, buyer));
        });
    });
}

fn bench_pay_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coordinator = rt.block_on(make_coordinator());
    let mut buyer = 0;

    c.bench_function("checkout/create_and_pay_order", |b| {
        b.iter(|| {
            buyer += 1;
            rt.block_on(async {
                let order_id = create_order(&coordinator, buyer).await;
                coordinator
                    .charge(BuyerId::new(buyer), Money::new(1000))
                    .await
                    .unwrap();
                coordinator
                    .pay_order(BuyerId::new(buyer), order_id)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_lock_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let locks = InMemoryLockManager::new();

    c.bench_function("checkout/lock_acquire_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let handle = locks
                    .acquire("payment-order:bench", LockOptions::default())
                    .await
                    .unwrap();
                locks.release(handle).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_stage_order_sheet,
    bench_create_order,
    bench_pay_order,
    bench_lock_round_trip
);
criterion_main!(benches);
