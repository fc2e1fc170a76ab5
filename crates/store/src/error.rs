use common::{BuyerId, Money, OptionId, OrderId, ProductId};
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The product does not exist in the catalog.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The option does not exist for the product.
    #[error("Option {option_id} not found for product {product_id}")]
    OptionNotFound {
        product_id: ProductId,
        option_id: OptionId,
    },

    /// Remaining stock is lower than the requested quantity.
    #[error(
        "Insufficient stock for product {product_id} (option {option_id:?}): requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        option_id: Option<OptionId>,
        requested: u32,
        available: u32,
    },

    /// The buyer's balance is lower than the requested debit.
    #[error("Insufficient balance for buyer {buyer_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        buyer_id: BuyerId,
        requested: Money,
        available: Money,
    },

    /// Balance mutations must be non-negative.
    #[error("Invalid amount: {0}")]
    InvalidAmount(Money),

    /// A total or balance would not fit in its column.
    #[error("Amount overflow: {0}")]
    Overflow(String),

    /// The order referenced by a write does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Another order already carries this order number.
    #[error("Order number already taken: {0}")]
    DuplicateOrderNumber(String),

    /// A payment was already recorded for the order.
    #[error("Payment already exists for order {0}")]
    PaymentAlreadyExists(OrderId),

    /// A stored value could not be mapped back to the model.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The backend refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
