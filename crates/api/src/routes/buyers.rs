//! Buyer balance endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{BuyerId, Money};
use lock::LockManager;
use serde::{Deserialize, Serialize};

use super::{AppState, CheckoutBackend, parse_numeric};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ChargeRequest {
    pub amount: Money,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub buyer_id: BuyerId,
    pub balance: Money,
}

/// GET /buyers/:id/balance
#[tracing::instrument(skip(state))]
pub async fn balance<S: CheckoutBackend, L: LockManager + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let buyer_id: BuyerId = parse_numeric(&id)?;
    let balance = state.coordinator.balance(buyer_id).await?;
    Ok(Json(BalanceResponse { buyer_id, balance }))
}

/// POST /buyers/:id/balance/charge: top up the balance.
#[tracing::instrument(skip(state, req))]
pub async fn charge<S: CheckoutBackend, L: LockManager + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<String>,
    Json(req): Json<ChargeRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let buyer_id: BuyerId = parse_numeric(&id)?;
    let balance = state.coordinator.charge(buyer_id, req.amount).await?;
    Ok(Json(BalanceResponse { buyer_id, balance }))
}
