//! Checkout error types.

use common::{BuyerId, Money, OptionId, OrderId, OrderSheetId, ProductId};
use lock::LockError;
use store::StoreError;
use thiserror::Error;

/// Errors surfaced by the checkout workflows.
///
/// Each variant maps to a stable machine code through [`CheckoutError::code`].
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Another request holds the lock. The client may retry shortly.
    #[error("Lock not acquired: {name}")]
    LockNotAcquired { name: String },

    /// The lock wait was interrupted.
    #[error("Interrupted while waiting for lock: {name}")]
    LockInterrupted { name: String },

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Option {option_id} not found for product {product_id}")]
    OptionNotFound {
        product_id: ProductId,
        option_id: OptionId,
    },

    #[error(
        "Insufficient stock for product {product_id} (option {option_id:?}): requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        option_id: Option<OptionId>,
        requested: u32,
        available: u32,
    },

    /// The order does not exist, belongs to another buyer, or is already paid.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Insufficient balance for buyer {buyer_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        buyer_id: BuyerId,
        requested: Money,
        available: Money,
    },

    /// The sheet does not exist, expired, or belongs to another buyer.
    #[error("Order sheet not found: {0}")]
    OrderSheetNotFound(OrderSheetId),

    #[error("Payment already exists for order {0}")]
    PaymentAlreadyExists(OrderId),

    /// The request is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The payment event could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lock error: {0}")]
    Lock(#[source] LockError),

    #[error("Store error: {0}")]
    Store(#[source] StoreError),
}

impl CheckoutError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            CheckoutError::LockNotAcquired { .. } => "lock-not-acquired",
            CheckoutError::LockInterrupted { .. } => "lock-wait-interrupted",
            CheckoutError::ProductNotFound(_) => "product-not-found",
            CheckoutError::OptionNotFound { .. } => "option-not-found",
            CheckoutError::InsufficientStock { .. } => "insufficient-stock",
            CheckoutError::OrderNotFound(_) => "order-not-found",
            CheckoutError::InsufficientBalance { .. } => "insufficient-balance",
            CheckoutError::OrderSheetNotFound(_) => "order-sheet-not-found",
            CheckoutError::PaymentAlreadyExists(_) => "payment-already-exists",
            CheckoutError::InvalidRequest(_) => "invalid-request",
            CheckoutError::Serialization(_) => "serialization-failure",
            CheckoutError::Lock(_) | CheckoutError::Store(_) => "internal",
        }
    }

    /// True only for contention, where the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckoutError::LockNotAcquired { .. })
    }
}

impl From<LockError> for CheckoutError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::NotAcquired { name } => CheckoutError::LockNotAcquired { name },
            LockError::Interrupted { name } => CheckoutError::LockInterrupted { name },
            other => CheckoutError::Lock(other),
        }
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProductNotFound(product_id) => CheckoutError::ProductNotFound(product_id),
            StoreError::OptionNotFound {
                product_id,
                option_id,
            } => CheckoutError::OptionNotFound {
                product_id,
                option_id,
            },
            StoreError::InsufficientStock {
                product_id,
                option_id,
                requested,
                available,
            } => CheckoutError::InsufficientStock {
                product_id,
                option_id,
                requested,
                available,
            },
            StoreError::InsufficientBalance {
                buyer_id,
                requested,
                available,
            } => CheckoutError::InsufficientBalance {
                buyer_id,
                requested,
                available,
            },
            StoreError::OrderNotFound(order_id) => CheckoutError::OrderNotFound(order_id),
            StoreError::PaymentAlreadyExists(order_id) => {
                CheckoutError::PaymentAlreadyExists(order_id)
            }
            StoreError::InvalidAmount(amount) => {
                CheckoutError::InvalidRequest(format!("invalid amount {amount}"))
            }
            StoreError::Overflow(what) => {
                CheckoutError::InvalidRequest(format!("amount out of range: {what}"))
            }
            StoreError::Serialization(e) => CheckoutError::Serialization(e),
            other => CheckoutError::Store(other),
        }
    }
}

/// Result type for checkout operations.
pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_contention_is_retryable() {
        let contended = CheckoutError::from(LockError::NotAcquired {
            name: "create-order:1".to_string(),
        });
        assert!(contended.is_retryable());
        assert_eq!(contended.code(), "lock-not-acquired");

        let stock = CheckoutError::from(StoreError::InsufficientStock {
            product_id: ProductId::new(1),
            option_id: None,
            requested: 2,
            available: 1,
        });
        assert!(!stock.is_retryable());
        assert_eq!(stock.code(), "insufficient-stock");
    }

    #[test]
    fn store_errors_keep_their_business_meaning() {
        let cases = [
            (
                StoreError::ProductNotFound(ProductId::new(1)),
                "product-not-found",
            ),
            (
                StoreError::OrderNotFound(OrderId::new()),
                "order-not-found",
            ),
            (
                StoreError::PaymentAlreadyExists(OrderId::new()),
                "payment-already-exists",
            ),
            (
                StoreError::Unavailable("down".to_string()),
                "internal",
            ),
        ];
        for (err, code) in cases {
            assert_eq!(CheckoutError::from(err).code(), code);
        }
    }

    #[test]
    fn interrupted_wait_has_its_own_code() {
        let err = CheckoutError::from(LockError::Interrupted {
            name: "payment-order:1".to_string(),
        });
        assert_eq!(err.code(), "lock-wait-interrupted");
        assert!(!err.is_retryable());
    }

    #[test]
    fn release_failures_are_internal() {
        let err = CheckoutError::from(LockError::NotHeld {
            name: "x".to_string(),
        });
        assert_eq!(err.code(), "internal");
    }
}
