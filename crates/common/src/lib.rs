//! Shared types used across the checkout crates.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{
    BuyerId, CartLineId, OptionId, OrderId, OrderSheetId, OutboxId, PaymentId, ProductId,
};
