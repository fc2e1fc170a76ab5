//! Order creation and payment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use checkout::CreateOrderRequest;
use common::{BuyerId, OrderId, PaymentId};
use lock::LockManager;
use serde::{Deserialize, Serialize};
use store::{Order, Payment};

use super::{AppState, CheckoutBackend, parse_uuid, require_buyer};
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct BuyerQuery {
    pub buyer_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PayOrderRequest {
    pub buyer_id: i64,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: OrderId,
}

#[derive(Debug, Serialize)]
pub struct PaymentCreatedResponse {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
}

// -- Handlers --

/// POST /orders: convert a staged order sheet into an order.
#[tracing::instrument(skip(state, req), fields(sheet_id = %req.sheet_id))]
pub async fn create<S: CheckoutBackend, L: LockManager + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let order_id = state.coordinator.create_order(req).await?;
    Ok((StatusCode::CREATED, Json(OrderCreatedResponse { order_id })))
}

/// GET /orders/:id?buyer_id=: load one of the buyer's orders.
#[tracing::instrument(skip(state))]
pub async fn get<S: CheckoutBackend, L: LockManager + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<String>,
    Query(query): Query<BuyerQuery>,
) -> Result<Json<Order>, ApiError> {
    let order_id: OrderId = parse_uuid(&id)?;
    let buyer_id = require_buyer(query.buyer_id)?;
    let order = state.coordinator.find_order(buyer_id, order_id).await?;
    Ok(Json(order))
}

/// POST /orders/:id/payment: pay the order from the buyer's balance.
#[tracing::instrument(skip(state, req), fields(buyer_id = req.buyer_id))]
pub async fn pay<S: CheckoutBackend, L: LockManager + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<String>,
    Json(req): Json<PayOrderRequest>,
) -> Result<(StatusCode, Json<PaymentCreatedResponse>), ApiError> {
    let order_id: OrderId = parse_uuid(&id)?;
    let payment_id = state
        .coordinator
        .pay_order(BuyerId::new(req.buyer_id), order_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(PaymentCreatedResponse {
            payment_id,
            order_id,
        }),
    ))
}

/// GET /orders/:id/payment?buyer_id=: load the payment of one of the buyer's orders.
#[tracing::instrument(skip(state))]
pub async fn payment<S: CheckoutBackend, L: LockManager + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<String>,
    Query(query): Query<BuyerQuery>,
) -> Result<Json<Payment>, ApiError> {
    let order_id: OrderId = parse_uuid(&id)?;
    let buyer_id = require_buyer(query.buyer_id)?;

    // Ownership check.
    state.coordinator.find_order(buyer_id, order_id).await?;

    let payment = state
        .coordinator
        .find_payment(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Payment for order {id} not found")))?;
    Ok(Json(payment))
}
