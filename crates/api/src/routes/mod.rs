//! HTTP handlers and shared application state.

pub mod buyers;
pub mod health;
pub mod metrics;
pub mod order_sheets;
pub mod orders;
pub mod products;

use checkout::OrderPaymentCoordinator;
use common::BuyerId;
use lock::LockManager;
use store::{BalanceLedger, InventoryStore, OrderSheetStore, OrderStore, PaymentStore};
use uuid::Uuid;

use crate::error::ApiError;

/// A single backend serving every checkout store contract.
pub trait CheckoutBackend:
    OrderSheetStore + OrderStore + PaymentStore + InventoryStore + BalanceLedger + Clone + 'static
{
}

impl<T> CheckoutBackend for T where
    T: OrderSheetStore + OrderStore + PaymentStore + InventoryStore + BalanceLedger + Clone + 'static
{
}

/// Shared application state accessible from all handlers.
pub struct AppState<S: CheckoutBackend, L: LockManager> {
    pub coordinator: OrderPaymentCoordinator<S, S, S, L>,
}

pub(crate) fn parse_uuid<T: From<Uuid>>(id: &str) -> Result<T, ApiError> {
    let uuid =
        Uuid::parse_str(id).map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(T::from(uuid))
}

pub(crate) fn parse_numeric<T: From<i64>>(id: &str) -> Result<T, ApiError> {
    id.parse::<i64>()
        .map(T::from)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}

pub(crate) fn require_buyer(buyer_id: Option<i64>) -> Result<BuyerId, ApiError> {
    buyer_id
        .map(BuyerId::new)
        .ok_or_else(|| ApiError::BadRequest("buyer_id is required".to_string()))
}
