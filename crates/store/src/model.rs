//! Records persisted by the store.

use chrono::{DateTime, Utc};
use common::{BuyerId, CartLineId, Money, OptionId, OrderId, OrderSheetId, PaymentId, ProductId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, StoreError};

/// Status of a staged or ordered line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    /// Staged or ordered, not yet paid.
    #[default]
    Waiting,
    /// Paid.
    DepositComplete,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Waiting => "WAITING",
            ItemStatus::DepositComplete => "DEPOSIT_COMPLETE",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "WAITING" => Ok(ItemStatus::Waiting),
            "DEPOSIT_COMPLETE" => Ok(ItemStatus::DepositComplete),
            other => Err(StoreError::Corrupt(format!("unknown item status '{other}'"))),
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product/option snapshot for one line, taken when the cart is staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub option_id: Option<OptionId>,
    pub option_name: Option<String>,
    pub unit_price: Money,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            option_id: None,
            option_name: None,
            unit_price,
            quantity,
        }
    }

    pub fn with_option(mut self, option_id: OptionId, option_name: impl Into<String>) -> Self {
        self.option_id = Some(option_id);
        self.option_name = Some(option_name.into());
        self
    }

    pub fn line_total(&self) -> Result<Money> {
        self.unit_price
            .checked_multiply(self.quantity)
            .ok_or_else(|| {
                StoreError::Overflow(format!(
                    "{} x {} for product {}",
                    self.unit_price, self.quantity, self.product_id
                ))
            })
    }
}

/// Sums quantities and prices over a set of lines.
pub fn totals<'a>(lines: impl IntoIterator<Item = &'a LineItem>) -> Result<(u32, Money)> {
    lines
        .into_iter()
        .try_fold((0u32, Money::zero()), |(quantity, price), line| {
            let quantity = quantity
                .checked_add(line.quantity)
                .ok_or_else(|| StoreError::Overflow("total quantity".to_string()))?;
            let price = price
                .checked_add(line.line_total()?)
                .ok_or_else(|| StoreError::Overflow("total price".to_string()))?;
            Ok((quantity, price))
        })
}

/// One staged line of an order sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemSheet {
    pub line: LineItem,
    pub status: ItemStatus,
}

/// A buyer's staged draft of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSheet {
    pub id: OrderSheetId,
    pub buyer_id: BuyerId,
    pub buyer_name: String,
    pub total_quantity: u32,
    pub total_price: Money,
    /// Cart lines this sheet was staged from, in ascending order.
    pub cart_line_ids: Vec<CartLineId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub items: Vec<OrderItemSheet>,
}

impl OrderSheet {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One line of a committed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub line: LineItem,
    pub status: ItemStatus,
}

/// A committed purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub buyer_id: BuyerId,
    pub buyer_name: String,
    pub total_quantity: u32,
    pub total_price: Money,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

impl Order {
    /// An order is paid once every item reached `DepositComplete`.
    pub fn is_paid(&self) -> bool {
        !self.items.is_empty()
            && self
                .items
                .iter()
                .all(|item| item.status == ItemStatus::DepositComplete)
    }
}

/// A settled payment. At most one exists per order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub buyer_id: BuyerId,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
}

/// Kind of balance mutation recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BalanceChange {
    Use,
    Charge,
    Refund,
}

impl BalanceChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceChange::Use => "USE",
            BalanceChange::Charge => "CHARGE",
            BalanceChange::Refund => "REFUND",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "USE" => Ok(BalanceChange::Use),
            "CHARGE" => Ok(BalanceChange::Charge),
            "REFUND" => Ok(BalanceChange::Refund),
            other => Err(StoreError::Corrupt(format!(
                "unknown balance change '{other}'"
            ))),
        }
    }
}

/// Append-only record of a balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceHistory {
    pub id: Uuid,
    pub buyer_id: BuyerId,
    pub kind: BalanceChange,
    pub amount: Money,
    pub balance_after: Money,
    pub created_at: DateTime<Utc>,
}

impl BalanceHistory {
    pub fn new(buyer_id: BuyerId, kind: BalanceChange, amount: Money, balance_after: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            buyer_id,
            kind,
            amount,
            balance_after,
            created_at: Utc::now(),
        }
    }
}
