use async_trait::async_trait;
use chrono::Utc;
use common::{
    BuyerId, CartLineId, Money, OptionId, OrderId, OrderSheetId, OutboxId, PaymentId, ProductId,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    BalanceChange, BalanceHistory, ItemStatus, LineItem, Order, OrderItem, OrderItemSheet,
    OrderSheet, OutboxEntry, OutboxStatus, Payment, Result, StoreError,
    store::{BalanceLedger, InventoryStore, OrderSheetStore, OrderStore, OutboxStore, PaymentStore},
};

/// SQLSTATE raised when a BIGINT result is out of range.
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

const OUTBOX_COLUMNS: &str = "id, aggregate_type, aggregate_id, event_type, payload, status, attempts, last_error, created_at, updated_at";

/// PostgreSQL-backed store implementing every storage contract.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Registers a product whose stock is kept without an option.
    pub async fn add_product(&self, product_id: ProductId, stock: u32) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_product(&mut tx, product_id).await?;
        upsert_stock(&mut tx, product_id, None, stock).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Registers an option of a product with its own stock.
    pub async fn add_option(
        &self,
        product_id: ProductId,
        option_id: OptionId,
        stock: u32,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_product(&mut tx, product_id).await?;
        sqlx::query(
            "INSERT INTO product_options (product_id, option_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(product_id.get())
        .bind(option_id.get())
        .execute(&mut *tx)
        .await?;
        upsert_stock(&mut tx, product_id, Some(option_id), stock).await?;
        tx.commit().await?;
        Ok(())
    }

    fn row_to_line(row: &PgRow) -> Result<LineItem> {
        Ok(LineItem {
            product_id: ProductId::new(row.try_get("product_id")?),
            product_name: row.try_get("product_name")?,
            option_id: row
                .try_get::<Option<i64>, _>("option_id")?
                .map(OptionId::new),
            option_name: row.try_get("option_name")?,
            unit_price: Money::new(row.try_get("unit_price")?),
            quantity: to_u32(row.try_get("quantity")?, "quantity")?,
        })
    }

    fn row_to_sheet(row: &PgRow, items: Vec<OrderItemSheet>) -> Result<OrderSheet> {
        let cart_line_ids: Vec<i64> = row.try_get("cart_line_ids")?;
        Ok(OrderSheet {
            id: OrderSheetId::from_uuid(row.try_get::<Uuid, _>("id")?),
            buyer_id: BuyerId::new(row.try_get("buyer_id")?),
            buyer_name: row.try_get("buyer_name")?,
            total_quantity: to_u32(row.try_get("total_quantity")?, "total_quantity")?,
            total_price: Money::new(row.try_get("total_price")?),
            cart_line_ids: cart_line_ids.into_iter().map(CartLineId::new).collect(),
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            items,
        })
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxEntry> {
        let status: String = row.try_get("status")?;
        Ok(OutboxEntry {
            id: OutboxId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            status: OutboxStatus::parse(&status)?,
            attempts: to_u32(i64::from(row.try_get::<i32, _>("attempts")?), "attempts")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn load_sheet(&self, row: Option<PgRow>) -> Result<Option<OrderSheet>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let sheet_id: Uuid = row.try_get("id")?;

        let items = sqlx::query(
            r#"
            SELECT product_id, product_name, option_id, option_name, unit_price, quantity, status
            FROM order_item_sheets
            WHERE order_sheet_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(sheet_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|item| {
            let status: String = item.try_get("status")?;
            Ok(OrderItemSheet {
                line: Self::row_to_line(item)?,
                status: ItemStatus::parse(&status)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        Self::row_to_sheet(&row, items).map(Some)
    }

    async fn stock_row(
        &self,
        product_id: ProductId,
        option_id: Option<OptionId>,
    ) -> Result<Option<i64>> {
        let quantity = sqlx::query_scalar(
            "SELECT quantity FROM product_stock WHERE product_id = $1 AND option_id IS NOT DISTINCT FROM $2",
        )
        .bind(product_id.get())
        .bind(option_id.map(|id| id.get()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(quantity)
    }
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

async fn insert_product(tx: &mut Transaction<'_, Postgres>, product_id: ProductId) -> Result<()> {
    sqlx::query("INSERT INTO products (id) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(product_id.get())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn upsert_stock(
    tx: &mut Transaction<'_, Postgres>,
    product_id: ProductId,
    option_id: Option<OptionId>,
    quantity: u32,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO product_stock (product_id, option_id, quantity)
        VALUES ($1, $2, $3)
        ON CONFLICT (product_id, COALESCE(option_id, 0)) DO UPDATE SET quantity = EXCLUDED.quantity
        "#,
    )
    .bind(product_id.get())
    .bind(option_id.map(|id| id.get()))
    .bind(i64::from(quantity))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn violates_constraint(err: &sqlx::Error, constraint: &str) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.constraint() == Some(constraint))
}

fn is_out_of_range(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(NUMERIC_VALUE_OUT_OF_RANGE)
    )
}

async fn append_history(
    tx: &mut Transaction<'_, Postgres>,
    row: &BalanceHistory,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO balance_history (id, buyer_id, kind, amount, balance_after, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(row.id)
    .bind(row.buyer_id.get())
    .bind(row.kind.as_str())
    .bind(row.amount.amount())
    .bind(row.balance_after.amount())
    .bind(row.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl OrderSheetStore for PostgresStore {
    async fn find_sheet_by_buyer(&self, buyer_id: BuyerId) -> Result<Option<OrderSheet>> {
        let row = sqlx::query(
            r#"
            SELECT id, buyer_id, buyer_name, total_quantity, total_price, cart_line_ids, created_at, expires_at
            FROM order_sheets
            WHERE buyer_id = $1
            "#,
        )
        .bind(buyer_id.get())
        .fetch_optional(&self.pool)
        .await?;

        self.load_sheet(row).await
    }

    async fn find_sheet(&self, sheet_id: OrderSheetId) -> Result<Option<OrderSheet>> {
        let row = sqlx::query(
            r#"
            SELECT id, buyer_id, buyer_name, total_quantity, total_price, cart_line_ids, created_at, expires_at
            FROM order_sheets
            WHERE id = $1
            "#,
        )
        .bind(sheet_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        self.load_sheet(row).await
    }

    async fn save_sheet(&self, sheet: &OrderSheet) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Stages for one buyer run one at a time; the later one replaces
        // the earlier sheet.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(sheet.buyer_id.get())
            .execute(&mut *tx)
            .await?;

        // Items go with the sheet through ON DELETE CASCADE.
        sqlx::query("DELETE FROM order_sheets WHERE buyer_id = $1")
            .bind(sheet.buyer_id.get())
            .execute(&mut *tx)
            .await?;

        let cart_line_ids: Vec<i64> = sheet.cart_line_ids.iter().map(|id| id.get()).collect();
        sqlx::query(
            r#"
            INSERT INTO order_sheets (id, buyer_id, buyer_name, total_quantity, total_price, cart_line_ids, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(sheet.id.as_uuid())
        .bind(sheet.buyer_id.get())
        .bind(&sheet.buyer_name)
        .bind(i64::from(sheet.total_quantity))
        .bind(sheet.total_price.amount())
        .bind(cart_line_ids)
        .bind(sheet.created_at)
        .bind(sheet.expires_at)
        .execute(&mut *tx)
        .await?;

        for (position, item) in sheet.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_item_sheets (id, order_sheet_id, position, product_id, product_name, option_id, option_name, unit_price, quantity, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(sheet.id.as_uuid())
            .bind(position as i32)
            .bind(item.line.product_id.get())
            .bind(&item.line.product_name)
            .bind(item.line.option_id.map(|id| id.get()))
            .bind(&item.line.option_name)
            .bind(item.line.unit_price.amount())
            .bind(i64::from(item.line.quantity))
            .bind(item.status.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_sheet(&self, sheet_id: OrderSheetId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM order_sheets WHERE id = $1")
            .bind(sheet_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, buyer_id, buyer_name, total_quantity, total_price, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.order_number)
        .bind(order.buyer_id.get())
        .bind(&order.buyer_name)
        .bind(i64::from(order.total_quantity))
        .bind(order.total_price.amount())
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if violates_constraint(&e, "unique_order_number") {
                tracing::warn!(order_number = %order.order_number, "order number already taken");
                return StoreError::DuplicateOrderNumber(order.order_number.clone());
            }
            StoreError::Database(e)
        })?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, position, product_id, product_name, option_id, option_name, unit_price, quantity, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(order.id.as_uuid())
            .bind(position as i32)
            .bind(item.line.product_id.get())
            .bind(&item.line.product_name)
            .bind(item.line.option_id.map(|id| id.get()))
            .bind(&item.line.option_name)
            .bind(item.line.unit_price.amount())
            .bind(i64::from(item.line.quantity))
            .bind(item.status.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_order(&self, buyer_id: BuyerId, order_id: OrderId) -> Result<Option<Order>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, order_number, buyer_id, buyer_name, total_quantity, total_price, created_at
            FROM orders
            WHERE id = $1 AND buyer_id = $2
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(buyer_id.get())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items = sqlx::query(
            r#"
            SELECT product_id, product_name, option_id, option_name, unit_price, quantity, status
            FROM order_items
            WHERE order_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|item| {
            let status: String = item.try_get("status")?;
            Ok(OrderItem {
                line: Self::row_to_line(item)?,
                status: ItemStatus::parse(&status)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        Ok(Some(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_number: row.try_get("order_number")?,
            buyer_id: BuyerId::new(row.try_get("buyer_id")?),
            buyer_name: row.try_get("buyer_name")?,
            total_quantity: to_u32(row.try_get("total_quantity")?, "total_quantity")?,
            total_price: Money::new(row.try_get("total_price")?),
            created_at: row.try_get("created_at")?,
            items,
        }))
    }
}

#[async_trait]
impl PaymentStore for PostgresStore {
    async fn commit_payment(&self, payment: &Payment, outbox: &OutboxEntry) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE order_items SET status = $2 WHERE order_id = $1")
            .bind(payment.order_id.as_uuid())
            .bind(ItemStatus::DepositComplete.as_str())
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(payment.order_id));
        }

        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, buyer_id, amount, paid_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.buyer_id.get())
        .bind(payment.amount.amount())
        .bind(payment.paid_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if violates_constraint(&e, "unique_payment_order") {
                tracing::warn!(order_id = %payment.order_id, "payment already recorded, rolling back");
                return StoreError::PaymentAlreadyExists(payment.order_id);
            }
            StoreError::Database(e)
        })?;

        sqlx::query(
            r#"
            INSERT INTO outbox (id, aggregate_type, aggregate_id, event_type, payload, status, attempts, last_error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(outbox.id.as_uuid())
        .bind(&outbox.aggregate_type)
        .bind(&outbox.aggregate_id)
        .bind(&outbox.event_type)
        .bind(&outbox.payload)
        .bind(outbox.status.as_str())
        .bind(outbox.attempts as i32)
        .bind(&outbox.last_error)
        .bind(outbox.created_at)
        .bind(outbox.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_payment_by_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row: Option<PgRow> = sqlx::query(
            "SELECT id, order_id, buyer_id, amount, paid_at FROM payments WHERE order_id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Payment {
                id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
                order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
                buyer_id: BuyerId::new(row.try_get("buyer_id")?),
                amount: Money::new(row.try_get("amount")?),
                paid_at: row.try_get("paid_at")?,
            })),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn fetch_unsent(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE status = $1 ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(OutboxStatus::Init.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    async fn fetch_retryable(&self, limit: usize, max_attempts: u32) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE status = $1 AND attempts < $2 ORDER BY created_at ASC LIMIT $3"
        ))
        .bind(OutboxStatus::Failed.as_str())
        .bind(max_attempts as i32)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_sent(&self, id: OutboxId) -> Result<()> {
        sqlx::query(
            "UPDATE outbox SET status = $2, last_error = NULL, updated_at = $3 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(OutboxStatus::Sent.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET status = $2, attempts = attempts + 1, last_error = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(OutboxStatus::Failed.as_str())
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_aggregate(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE aggregate_type = $1 AND aggregate_id = $2 ORDER BY created_at ASC"
        ))
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }
}

#[async_trait]
impl InventoryStore for PostgresStore {
    async fn validate(&self, product_id: ProductId, option_id: Option<OptionId>) -> Result<()> {
        let product_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM products WHERE id = $1)")
                .bind(product_id.get())
                .fetch_one(&self.pool)
                .await?;
        if !product_exists {
            return Err(StoreError::ProductNotFound(product_id));
        }

        if let Some(option_id) = option_id {
            let option_exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM product_options WHERE product_id = $1 AND option_id = $2)",
            )
            .bind(product_id.get())
            .bind(option_id.get())
            .fetch_one(&self.pool)
            .await?;
            if !option_exists {
                return Err(StoreError::OptionNotFound {
                    product_id,
                    option_id,
                });
            }
        }
        Ok(())
    }

    async fn deduct(
        &self,
        product_id: ProductId,
        option_id: Option<OptionId>,
        quantity: u32,
    ) -> Result<()> {
        // Conditional decrement: the row lock taken by UPDATE serializes
        // concurrent deductions of the same stock row.
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE product_stock
            SET quantity = quantity - $3
            WHERE product_id = $1 AND option_id IS NOT DISTINCT FROM $2 AND quantity >= $3
            RETURNING quantity
            "#,
        )
        .bind(product_id.get())
        .bind(option_id.map(|id| id.get()))
        .bind(i64::from(quantity))
        .fetch_optional(&self.pool)
        .await?;

        if remaining.is_some() {
            return Ok(());
        }

        self.validate(product_id, option_id).await?;
        let available = self.stock_row(product_id, option_id).await?.unwrap_or(0);
        Err(StoreError::InsufficientStock {
            product_id,
            option_id,
            requested: quantity,
            available: to_u32(available, "quantity")?,
        })
    }

    async fn restock(
        &self,
        product_id: ProductId,
        option_id: Option<OptionId>,
        quantity: u32,
    ) -> Result<()> {
        self.validate(product_id, option_id).await?;

        sqlx::query(
            r#"
            INSERT INTO product_stock (product_id, option_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (product_id, COALESCE(option_id, 0))
            DO UPDATE SET quantity = product_stock.quantity + EXCLUDED.quantity
            "#,
        )
        .bind(product_id.get())
        .bind(option_id.map(|id| id.get()))
        .bind(i64::from(quantity))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stock(&self, product_id: ProductId, option_id: Option<OptionId>) -> Result<u32> {
        self.validate(product_id, option_id).await?;
        let quantity = self.stock_row(product_id, option_id).await?.unwrap_or(0);
        to_u32(quantity, "quantity")
    }
}

#[async_trait]
impl BalanceLedger for PostgresStore {
    async fn balance(&self, buyer_id: BuyerId) -> Result<Money> {
        let amount: Option<i64> =
            sqlx::query_scalar("SELECT amount FROM balances WHERE buyer_id = $1")
                .bind(buyer_id.get())
                .fetch_optional(&self.pool)
                .await?;
        Ok(Money::new(amount.unwrap_or(0)))
    }

    async fn debit(&self, buyer_id: BuyerId, amount: Money) -> Result<Money> {
        if amount.is_negative() {
            return Err(StoreError::InvalidAmount(amount));
        }
        let mut tx = self.pool.begin().await?;

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE balances
            SET amount = amount - $2
            WHERE buyer_id = $1 AND amount >= $2
            RETURNING amount
            "#,
        )
        .bind(buyer_id.get())
        .bind(amount.amount())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(remaining) = remaining.map(Money::new) else {
            let available: Option<i64> =
                sqlx::query_scalar("SELECT amount FROM balances WHERE buyer_id = $1")
                    .bind(buyer_id.get())
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(StoreError::InsufficientBalance {
                buyer_id,
                requested: amount,
                available: Money::new(available.unwrap_or(0)),
            });
        };

        append_history(
            &mut tx,
            &BalanceHistory::new(buyer_id, BalanceChange::Use, amount, remaining),
        )
        .await?;

        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;

        let balance_after: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO balances (buyer_id, amount)
            VALUES ($1, $2)
            ON CONFLICT (buyer_id) DO UPDATE SET amount = balances.amount + EXCLUDED.amount
            RETURNING amount
            "#,
        )
        .bind(buyer_id.get())
        .bind(amount.amount())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_out_of_range(&e) {
                tracing::warn!(%buyer_id, %amount, "credit would overflow the balance");
                return StoreError::Overflow(format!("balance of buyer {buyer_id} plus {amount}"));
            }
            StoreError::Database(e)
        })?;
        let balance_after = Money::new(balance_after);

        append_history(
            &mut tx,
            &BalanceHistory::new(buyer_id, kind, amount, balance_after),
        )
        .await?;

        tx.commit().await?;
        Ok(balance_after)
    }

    async fn history(&self, buyer_id: BuyerId) -> Result<Vec<BalanceHistory>> {
        let rows = sqlx::query(
            r#"
            SELECT id, buyer_id, kind, amount, balance_after, created_at
            FROM balance_history
            WHERE buyer_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(buyer_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let kind: String = row.try_get("kind")?;
                Ok(BalanceHistory {
                    id: row.try_get("id")?,
                    buyer_id: BuyerId::new(row.try_get("buyer_id")?),
                    kind: BalanceChange::parse(&kind)?,
                    amount: Money::new(row.try_get("amount")?),
                    balance_after: Money::new(row.try_get("balance_after")?),
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
