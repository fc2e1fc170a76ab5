//! Order and payment orchestration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::{BuyerId, Money, OptionId, OrderId, OrderSheetId, PaymentId, ProductId};
use lock::{LockHandle, LockManager, LockOptions};
use serde::{Deserialize, Serialize};
use store::{
    BalanceChange, BalanceLedger, InventoryStore, ItemStatus, LineItem, Order, OrderItem,
    OrderSheet, OrderSheetStore, OrderStore, Payment, PaymentStore, StoreError,
};
use uuid::Uuid;

use crate::collector::{CollectedOrder, OrderCollector};
use crate::events::PaymentCompleted;
use crate::order_sheet::{DEFAULT_SHEET_TTL, OrderSheetService, StageRequest};
use crate::{CheckoutError, Result};

/// Order numbers drawn per order before a collision is reported.
const ORDER_NUMBER_ATTEMPTS: u32 = 3;

/// Lock name guarding order creation from a sheet.
pub fn create_order_lock(sheet_id: OrderSheetId) -> String {
    format!("create-order:{sheet_id}")
}

/// Lock name guarding payment of an order.
pub fn payment_order_lock(order_id: OrderId) -> String {
    format!("payment-order:{order_id}")
}

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Wait and lease used for both workflow locks.
    pub lock: LockOptions,
    /// Undo stock deductions and debits when a later step fails.
    pub compensate: bool,
    pub sheet_ttl: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock: LockOptions::default(),
            compensate: true,
            sheet_ttl: DEFAULT_SHEET_TTL,
        }
    }
}

/// One requested line of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub option_id: Option<OptionId>,
    pub quantity: u32,
}

/// Input to [`OrderPaymentCoordinator::create_order`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub sheet_id: OrderSheetId,
    pub buyer_id: BuyerId,
    /// Lines to order. Each must be on the sheet; empty orders the whole
    /// sheet as staged.
    #[serde(default)]
    pub items: Vec<OrderLine>,
}

/// Runs the create-order and pay-order workflows.
///
/// Each workflow is a short critical section under a named lease. Inventory
/// and balance mutations rely on the atomicity of their own stores; the lock
/// only serializes requests for the same sheet or order.
pub struct OrderPaymentCoordinator<S, I, B, L>
where
    S: OrderSheetStore + OrderStore + PaymentStore + Clone,
    I: InventoryStore,
    B: BalanceLedger,
    L: LockManager,
{
    sheets: OrderSheetService<S>,
    store: S,
    inventory: I,
    balances: B,
    locks: L,
    collector: Arc<dyn OrderCollector>,
    config: CoordinatorConfig,
}

impl<S, I, B, L> OrderPaymentCoordinator<S, I, B, L>
where
    S: OrderSheetStore + OrderStore + PaymentStore + Clone,
    I: InventoryStore,
    B: BalanceLedger,
    L: LockManager,
{
    pub fn new(
        store: S,
        inventory: I,
        balances: B,
        locks: L,
        collector: Arc<dyn OrderCollector>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            sheets: OrderSheetService::new(store.clone(), config.sheet_ttl),
            store,
            inventory,
            balances,
            locks,
            collector,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn sheets(&self) -> &OrderSheetService<S> {
        &self.sheets
    }

    /// Stages a cart into the buyer's order sheet.
    pub async fn stage_order_sheet(&self, request: StageRequest) -> Result<OrderSheet> {
        self.sheets.stage(request).await
    }

    pub async fn order_sheet(&self, sheet_id: OrderSheetId) -> Result<OrderSheet> {
        self.sheets.get(sheet_id).await
    }

    /// Converts a staged sheet into an order, deducting stock for each line.
    ///
    /// Returns the new order id. Fails with
    /// [`CheckoutError::LockNotAcquired`] if the sheet is being ordered by
    /// another request.
    #[tracing::instrument(skip(self, request), fields(sheet_id = %request.sheet_id, buyer_id = %request.buyer_id))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<OrderId> {
        let started = Instant::now();

        let name = create_order_lock(request.sheet_id);
        let result = match self.acquire(&name).await {
            Ok(handle) => {
                let result = self.create_order_locked(&request).await;
                self.release(handle).await;
                result
            }
            Err(e) => Err(e),
        };

        metrics::histogram!("checkout_duration_seconds", "operation" => "create_order")
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => metrics::counter!("orders_created_total").increment(1),
            Err(e) => {
                metrics::counter!("order_create_failures_total", "code" => e.code()).increment(1)
            }
        }
        result
    }

    /// Pays an order from the buyer's balance and records the payment event.
    ///
    /// Returns the payment id. The collector is notified in the background
    /// and its failures never affect the result.
    #[tracing::instrument(skip(self))]
    pub async fn pay_order(&self, buyer_id: BuyerId, order_id: OrderId) -> Result<PaymentId> {
        let started = Instant::now();

        let name = payment_order_lock(order_id);
        let result = match self.acquire(&name).await {
            Ok(handle) => {
                let result = self.pay_order_locked(buyer_id, order_id).await;
                self.release(handle).await;
                result
            }
            Err(e) => Err(e),
        };

        metrics::histogram!("checkout_duration_seconds", "operation" => "pay_order")
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => metrics::counter!("payments_completed_total").increment(1),
            Err(e) => metrics::counter!("payment_failures_total", "code" => e.code()).increment(1),
        }
        result
    }

    /// Returns the buyer's order, paid or not.
    pub async fn find_order(&self, buyer_id: BuyerId, order_id: OrderId) -> Result<Order> {
        self.store
            .find_order(buyer_id, order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))
    }

    pub async fn find_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self.store.find_payment_by_order(order_id).await?)
    }

    pub async fn balance(&self, buyer_id: BuyerId) -> Result<Money> {
        Ok(self.balances.balance(buyer_id).await?)
    }

    /// Tops up a buyer's balance. Returns the new balance.
    #[tracing::instrument(skip(self))]
    pub async fn charge(&self, buyer_id: BuyerId, amount: Money) -> Result<Money> {
        if amount.is_negative() || amount.is_zero() {
            return Err(CheckoutError::InvalidRequest(format!(
                "charge amount must be positive, got {amount}"
            )));
        }
        Ok(self
            .balances
            .credit(buyer_id, amount, BalanceChange::Charge)
            .await?)
    }

    pub async fn stock(&self, product_id: ProductId, option_id: Option<OptionId>) -> Result<u32> {
        Ok(self.inventory.stock(product_id, option_id).await?)
    }

    async fn acquire(&self, name: &str) -> Result<LockHandle> {
        let handle = self.locks.acquire(name, self.config.lock).await?;
        tracing::info!(lock = name, "lock acquired");
        Ok(handle)
    }

    /// Releases a workflow lock. Release failures happen after the protected
    /// work finished, so they are logged and never change the outcome.
    async fn release(&self, handle: LockHandle) {
        let name = handle.name().to_string();
        match self.locks.release(handle).await {
            Ok(()) => tracing::info!(lock = %name, "lock released"),
            Err(e) if e.is_release_failure() => {
                tracing::warn!(lock = %name, error = %e, "lock was no longer held at release")
            }
            Err(e) => tracing::warn!(lock = %name, error = %e, "lock release failed"),
        }
    }

    async fn create_order_locked(&self, request: &CreateOrderRequest) -> Result<OrderId> {
        let sheet = self.sheets.get(request.sheet_id).await?;
        if sheet.buyer_id != request.buyer_id {
            return Err(CheckoutError::OrderSheetNotFound(request.sheet_id));
        }
        let lines = resolve_lines(&sheet, &request.items)?;
        let mut order = build_order(&sheet, &lines, Utc::now())?;

        // Validation runs for every line before anything is mutated.
        for line in &lines {
            self.inventory
                .validate(line.product_id, line.option_id)
                .await?;
        }

        let mut deducted: Vec<&LineItem> = Vec::with_capacity(lines.len());
        for line in &lines {
            if let Err(e) = self
                .inventory
                .deduct(line.product_id, line.option_id, line.quantity)
                .await
            {
                self.restock(&deducted).await;
                return Err(e.into());
            }
            deducted.push(line);
        }

        let mut attempt = 1;
        loop {
            match self.store.insert_order(&order).await {
                Ok(()) => break,
                Err(StoreError::DuplicateOrderNumber(number))
                    if attempt < ORDER_NUMBER_ATTEMPTS =>
                {
                    tracing::warn!(
                        order_number = %number,
                        attempt,
                        "order number taken, drawing another"
                    );
                    order.order_number = order_number(order.created_at);
                    attempt += 1;
                }
                Err(e) => {
                    self.restock(&deducted).await;
                    return Err(e.into());
                }
            }
        }

        // The order is committed; a sheet that is already gone changes nothing.
        if let Err(e) = self.sheets.complete(sheet.id).await {
            tracing::warn!(sheet_id = %sheet.id, error = %e, "order sheet not completed");
        }

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total_price = %order.total_price,
            "order created"
        );
        Ok(order.id)
    }

    async fn pay_order_locked(&self, buyer_id: BuyerId, order_id: OrderId) -> Result<PaymentId> {
        let order = self
            .store
            .find_order(buyer_id, order_id)
            .await?
            .filter(|order| !order.is_paid())
            .ok_or(CheckoutError::OrderNotFound(order_id))?;

        let amount = order.total_price;
        self.balances.debit(buyer_id, amount).await?;

        let payment = Payment {
            id: PaymentId::new(),
            order_id,
            buyer_id,
            amount,
            paid_at: Utc::now(),
        };
        let committed = match PaymentCompleted::new(&order, &payment).to_outbox_entry() {
            Ok(entry) => self
                .store
                .commit_payment(&payment, &entry)
                .await
                .map_err(CheckoutError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = committed {
            self.refund(buyer_id, amount).await;
            return Err(e);
        }

        self.notify_collector(&order);

        tracing::info!(payment_id = %payment.id, amount = %amount, "payment completed");
        Ok(payment.id)
    }

    /// Restocks deducted lines, most recent first.
    async fn restock(&self, deducted: &[&LineItem]) {
        if deducted.is_empty() {
            return;
        }
        if !self.config.compensate {
            tracing::warn!(
                lines = deducted.len(),
                "order aborted after stock deduction; compensation disabled"
            );
            return;
        }
        for line in deducted.iter().rev() {
            match self
                .inventory
                .restock(line.product_id, line.option_id, line.quantity)
                .await
            {
                Ok(()) => tracing::info!(
                    product_id = %line.product_id,
                    quantity = line.quantity,
                    "deducted stock restored"
                ),
                Err(e) => tracing::warn!(
                    product_id = %line.product_id,
                    quantity = line.quantity,
                    error = %e,
                    "failed to restore deducted stock"
                ),
            }
        }
    }

    /// Credits back a debit whose payment did not commit.
    async fn refund(&self, buyer_id: BuyerId, amount: Money) {
        if !self.config.compensate {
            tracing::warn!(%buyer_id, %amount, "payment aborted after debit; compensation disabled");
            return;
        }
        match self
            .balances
            .credit(buyer_id, amount, BalanceChange::Refund)
            .await
        {
            Ok(balance) => tracing::info!(%buyer_id, %amount, %balance, "debit refunded"),
            Err(e) => tracing::warn!(%buyer_id, %amount, error = %e, "failed to refund debit"),
        }
    }

    fn notify_collector(&self, order: &Order) {
        let collector = Arc::clone(&self.collector);
        let record = CollectedOrder {
            order_number: order.order_number.clone(),
            total_price: order.total_price,
            created_at: order.created_at,
        };
        tokio::spawn(async move {
            if let Err(e) = collector.send(&record).await {
                tracing::warn!(
                    order_number = %record.order_number,
                    error = %e,
                    "order collection failed"
                );
            }
        });
    }
}

/// Picks the sheet lines named by the request, with the requested quantities.
fn resolve_lines(sheet: &OrderSheet, requested: &[OrderLine]) -> Result<Vec<LineItem>> {
    if requested.is_empty() {
        return Ok(sheet.items.iter().map(|item| item.line.clone()).collect());
    }

    requested
        .iter()
        .map(|wanted| {
            if wanted.quantity == 0 {
                return Err(CheckoutError::InvalidRequest(format!(
                    "quantity for product {} must be positive",
                    wanted.product_id
                )));
            }
            let staged = sheet
                .items
                .iter()
                .find(|item| {
                    item.line.product_id == wanted.product_id
                        && item.line.option_id == wanted.option_id
                })
                .ok_or_else(|| {
                    CheckoutError::InvalidRequest(format!(
                        "product {} (option {:?}) is not on order sheet {}",
                        wanted.product_id, wanted.option_id, sheet.id
                    ))
                })?;
            Ok(LineItem {
                quantity: wanted.quantity,
                ..staged.line.clone()
            })
        })
        .collect()
}

fn build_order(
    sheet: &OrderSheet,
    lines: &[LineItem],
    created_at: DateTime<Utc>,
) -> Result<Order> {
    let (total_quantity, total_price) = store::model::totals(lines)?;
    if total_price.is_negative() {
        return Err(CheckoutError::InvalidRequest(format!(
            "order total must not be negative, got {total_price}"
        )));
    }
    Ok(Order {
        id: OrderId::new(),
        order_number: order_number(created_at),
        buyer_id: sheet.buyer_id,
        buyer_name: sheet.buyer_name.clone(),
        total_quantity,
        total_price,
        created_at,
        items: lines
            .iter()
            .map(|line| OrderItem {
                line: line.clone(),
                status: ItemStatus::Waiting,
            })
            .collect(),
    })
}

/// `YYYYMMDDHHMMSS-NNNNNN`: creation time plus a random suffix.
fn order_number(created_at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().as_u128() % 1_000_000;
    format!("{}-{suffix:06}", created_at.format("%Y%m%d%H%M%S"))
}
