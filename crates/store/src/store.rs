use async_trait::async_trait;
use common::{BuyerId, Money, OptionId, OrderId, OrderSheetId, OutboxId, ProductId};

use crate::{BalanceChange, BalanceHistory, Order, OrderSheet, OutboxEntry, Payment, Result};

/// Storage for staged order sheets.
#[async_trait]
pub trait OrderSheetStore: Send + Sync {
    /// Returns the buyer's sheet, expired or not.
    async fn find_sheet_by_buyer(&self, buyer_id: BuyerId) -> Result<Option<OrderSheet>>;

    async fn find_sheet(&self, sheet_id: OrderSheetId) -> Result<Option<OrderSheet>>;

    /// Stores a sheet with its items, replacing any sheet the buyer already has.
    async fn save_sheet(&self, sheet: &OrderSheet) -> Result<()>;

    /// Deletes a sheet and its items. Returns false if it did not exist.
    async fn delete_sheet(&self, sheet_id: OrderSheetId) -> Result<bool>;
}

/// Storage for committed orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts an order and all of its items atomically.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    /// Returns the order only if it belongs to `buyer_id`.
    async fn find_order(&self, buyer_id: BuyerId, order_id: OrderId) -> Result<Option<Order>>;
}

/// Storage for payments and the outbox entries they emit.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Records a payment in one local transaction: inserts the payment,
    /// moves the order's items to `DepositComplete` and inserts `outbox`.
    ///
    /// Either all three writes commit or none do. Fails with
    /// [`StoreError::PaymentAlreadyExists`](crate::StoreError::PaymentAlreadyExists)
    /// if the order already has a payment.
    async fn commit_payment(&self, payment: &Payment, outbox: &OutboxEntry) -> Result<()>;

    async fn find_payment_by_order(&self, order_id: OrderId) -> Result<Option<Payment>>;
}

/// Storage side of the outbox relay.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Returns up to `limit` `INIT` entries, oldest first.
    async fn fetch_unsent(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Returns up to `limit` `FAILED` entries with fewer than `max_attempts`
    /// attempts, oldest first.
    async fn fetch_retryable(&self, limit: usize, max_attempts: u32) -> Result<Vec<OutboxEntry>>;

    async fn mark_sent(&self, id: OutboxId) -> Result<()>;

    /// Marks an entry `FAILED`, bumping its attempt count.
    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<()>;

    async fn find_by_aggregate(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Vec<OutboxEntry>>;
}

/// Product stock with atomic check-and-decrement.
///
/// Deductions against the same product/option are serialized by the storage
/// layer itself, independently of any order-level lock.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Checks that the product, and the option if given, exist.
    async fn validate(&self, product_id: ProductId, option_id: Option<OptionId>) -> Result<()>;

    /// Removes `quantity` from stock, failing with `InsufficientStock` if less
    /// remains. The check and the decrement are one atomic step.
    async fn deduct(
        &self,
        product_id: ProductId,
        option_id: Option<OptionId>,
        quantity: u32,
    ) -> Result<()>;

    /// Adds `quantity` back to stock.
    async fn restock(
        &self,
        product_id: ProductId,
        option_id: Option<OptionId>,
        quantity: u32,
    ) -> Result<()>;

    async fn stock(&self, product_id: ProductId, option_id: Option<OptionId>) -> Result<u32>;
}

/// Spendable buyer balance with history.
///
/// Every mutation appends a [`BalanceHistory`] row atomically with it. The
/// ledger does not de-duplicate requests.
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Current balance; zero for buyers without a balance row.
    async fn balance(&self, buyer_id: BuyerId) -> Result<Money>;

    /// Removes `amount`, failing with `InsufficientBalance` if less remains.
    /// Returns the new balance.
    async fn debit(&self, buyer_id: BuyerId, amount: Money) -> Result<Money>;

    /// Adds `amount`. Returns the new balance.
    async fn credit(&self, buyer_id: BuyerId, amount: Money, kind: BalanceChange)
    -> Result<Money>;

    /// History rows for the buyer, oldest first.
    async fn history(&self, buyer_id: BuyerId) -> Result<Vec<BalanceHistory>>;
}
