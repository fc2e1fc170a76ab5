use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{BuyerId, Money, OptionId, OrderId, OrderSheetId, OutboxId, ProductId};
use tokio::sync::RwLock;

use crate::{
    BalanceChange, BalanceHistory, ItemStatus, Order, OrderSheet, OutboxEntry, OutboxStatus,
    Payment, Result, StoreError,
    store::{BalanceLedger, InventoryStore, OrderSheetStore, OrderStore, OutboxStore, PaymentStore},
};

#[derive(Default)]
struct State {
    sheets: HashMap<OrderSheetId, OrderSheet>,
    orders: HashMap<OrderId, Order>,
    payments: HashMap<OrderId, Payment>,
    outbox: Vec<OutboxEntry>,
    products: HashMap<ProductId, HashSet<OptionId>>,
    stock: HashMap<(ProductId, Option<OptionId>), u32>,
    balances: HashMap<BuyerId, Money>,
    balance_history: Vec<BalanceHistory>,
    fail_on_insert_order: bool,
    order_number_collisions: u32,
}

impl State {
    fn check_product(&self, product_id: ProductId, option_id: Option<OptionId>) -> Result<()> {
        let options = self
            .products
            .get(&product_id)
            .ok_or(StoreError::ProductNotFound(product_id))?;

        if let Some(option_id) = option_id
            && !options.contains(&option_id)
        {
            return Err(StoreError::OptionNotFound {
                product_id,
                option_id,
            });
        }
        Ok(())
    }
}

/// In-memory store implementing every storage contract.
///
/// All state sits behind one lock, so each trait method is atomic with
/// respect to every other, which is what the PostgreSQL implementation gets
/// from row locks and transactions. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a product whose stock is kept without an option.
    pub async fn add_product(&self, product_id: ProductId, stock: u32) {
        let mut state = self.state.write().await;
        state.products.entry(product_id).or_default();
        state.stock.insert((product_id, None), stock);
    }

    /// Registers an option of a product with its own stock.
    pub async fn add_option(&self, product_id: ProductId, option_id: OptionId, stock: u32) {
        let mut state = self.state.write().await;
        state.products.entry(product_id).or_default().insert(option_id);
        state.stock.insert((product_id, Some(option_id)), stock);
    }

    /// Makes the next `insert_order` calls fail until reset.
    pub async fn set_fail_on_insert_order(&self, fail: bool) {
        self.state.write().await.fail_on_insert_order = fail;
    }

    /// Makes the next `collisions` calls to `insert_order` report the order
    /// number as taken.
    pub async fn set_order_number_collisions(&self, collisions: u32) {
        self.state.write().await.order_number_collisions = collisions;
    }

    pub async fn sheet_count(&self) -> usize {
        self.state.read().await.sheets.len()
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    /// Returns every outbox entry in insertion order.
    pub async fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.state.read().await.outbox.clone()
    }
}

#[async_trait]
impl OrderSheetStore for InMemoryStore {
    async fn find_sheet_by_buyer(&self, buyer_id: BuyerId) -> Result<Option<OrderSheet>> {
        let state = self.state.read().await;
        Ok(state
            .sheets
            .values()
            .find(|sheet| sheet.buyer_id == buyer_id)
            .cloned())
    }

    async fn find_sheet(&self, sheet_id: OrderSheetId) -> Result<Option<OrderSheet>> {
        Ok(self.state.read().await.sheets.get(&sheet_id).cloned())
    }

    async fn save_sheet(&self, sheet: &OrderSheet) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .sheets
            .retain(|_, existing| existing.buyer_id != sheet.buyer_id);
        state.sheets.insert(sheet.id, sheet.clone());
        Ok(())
    }

    async fn delete_sheet(&self, sheet_id: OrderSheetId) -> Result<bool> {
        Ok(self.state.write().await.sheets.remove(&sheet_id).is_some())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_insert_order {
            return Err(StoreError::Unavailable("order insert rejected".to_string()));
        }
        if state.order_number_collisions > 0 {
            state.order_number_collisions -= 1;
            return Err(StoreError::DuplicateOrderNumber(order.order_number.clone()));
        }
        if state
            .orders
            .values()
            .any(|existing| existing.order_number == order.order_number)
        {
            return Err(StoreError::DuplicateOrderNumber(order.order_number.clone()));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_order(&self, buyer_id: BuyerId, order_id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .get(&order_id)
            .filter(|order| order.buyer_id == buyer_id)
            .cloned())
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn commit_payment(&self, payment: &Payment, outbox: &OutboxEntry) -> Result<()> {
        let mut state = self.state.write().await;

        if state.payments.contains_key(&payment.order_id) {
            return Err(StoreError::PaymentAlreadyExists(payment.order_id));
        }
        let order = state
            .orders
            .get_mut(&payment.order_id)
            .ok_or(StoreError::OrderNotFound(payment.order_id))?;

        for item in &mut order.items {
            item.status = ItemStatus::DepositComplete;
        }
        state.payments.insert(payment.order_id, payment.clone());
        state.outbox.push(outbox.clone());
        Ok(())
    }

    async fn find_payment_by_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&order_id).cloned())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn fetch_unsent(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|entry| entry.status == OutboxStatus::Init)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_retryable(&self, limit: usize, max_attempts: u32) -> Result<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|entry| entry.status == OutboxStatus::Failed && entry.attempts < max_attempts)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, id: OutboxId) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(entry) = state.outbox.iter_mut().find(|entry| entry.id == id) {
            entry.status = OutboxStatus::Sent;
            entry.last_error = None;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(entry) = state.outbox.iter_mut().find(|entry| entry.id == id) {
            entry.status = OutboxStatus::Failed;
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_by_aggregate(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|entry| {
                entry.aggregate_type == aggregate_type && entry.aggregate_id == aggregate_id
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    async fn validate(&self, product_id: ProductId, option_id: Option<OptionId>) -> Result<()> {
        self.state.read().await.check_product(product_id, option_id)
    }

    async fn deduct(
        &self,
        product_id: ProductId,
        option_id: Option<OptionId>,
        quantity: u32,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_product(product_id, option_id)?;

        let available = state.stock.entry((product_id, option_id)).or_insert(0);
        if *available < quantity {
            return Err(StoreError::InsufficientStock {
                product_id,
                option_id,
                requested: quantity,
                available: *available,
            });
        }
        *available -= quantity;
        Ok(())
    }

    async fn restock(
        &self,
        product_id: ProductId,
        option_id: Option<OptionId>,
        quantity: u32,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_product(product_id, option_id)?;
        let slot = state.stock.entry((product_id, option_id)).or_insert(0);
        *slot = slot.saturating_add(quantity);
        Ok(())
    }

    async fn stock(&self, product_id: ProductId, option_id: Option<OptionId>) -> Result<u32> {
        let state = self.state.read().await;
        state.check_product(product_id, option_id)?;
        Ok(state
            .stock
            .get(&(product_id, option_id))
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl BalanceLedger for InMemoryStore {
    async fn balance(&self, buyer_id: BuyerId) -> Result<Money> {
        let state = self.state.read().await;
        Ok(state.balances.get(&buyer_id).copied().unwrap_or_default())
    }

    async fn debit(&self, buyer_id: BuyerId, amount: Money) -> Result<Money> {
        if amount.is_negative() {
            return Err(StoreError::InvalidAmount(amount));
        }
        let mut state = self.state.write().await;

        let available = state.balances.get(&buyer_id).copied().unwrap_or_default();
        let remaining =
            available
                .checked_sub(amount)
                .ok_or(StoreError::InsufficientBalance {
                    buyer_id,
                    requested: amount,
                    available,
                })?;

        state.balances.insert(buyer_id, remaining);
        state.balance_history.push(BalanceHistory::new(
            buyer_id,
            BalanceChange::Use,
            amount,
            remaining,
        ));
        Ok(remaining)
    }

    async fn credit(
        &self,
        buyer_id: BuyerId,
        amount: Money,
        kind: BalanceChange,
    ) -> Result<Money> {
        if amount.is_negative() {
            return Err(StoreError::InvalidAmount(amount));
        }
        let mut state = self.state.write().await;

        let current = state.balances.get(&buyer_id).copied().unwrap_or_default();
        let balance_after = current.checked_add(amount).ok_or_else(|| {
            StoreError::Overflow(format!("balance of buyer {buyer_id} plus {amount}"))
        })?;
        state.balances.insert(buyer_id, balance_after);

        state
            .balance_history
            .push(BalanceHistory::new(buyer_id, kind, amount, balance_after));
        Ok(balance_after)
    }

    async fn history(&self, buyer_id: BuyerId) -> Result<Vec<BalanceHistory>> {
        let state = self.state.read().await;
        Ok(state
            .balance_history
            .iter()
            .filter(|row| row.buyer_id == buyer_id)
            .cloned()
            .collect())
    }
}
