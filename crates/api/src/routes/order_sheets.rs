//! Order sheet staging endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use checkout::StageRequest;
use common::OrderSheetId;
use lock::LockManager;
use store::OrderSheet;

use super::{AppState, CheckoutBackend, parse_uuid};
use crate::error::ApiError;

/// POST /order-sheets: stage the buyer's cart selection.
#[tracing::instrument(skip(state, req), fields(buyer_id = %req.buyer_id))]
pub async fn stage<S: CheckoutBackend, L: LockManager + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Json(req): Json<StageRequest>,
) -> Result<(StatusCode, Json<OrderSheet>), ApiError> {
    let sheet = state.coordinator.stage_order_sheet(req).await?;
    Ok((StatusCode::CREATED, Json(sheet)))
}

/// GET /order-sheets/:id: load a live order sheet.
#[tracing::instrument(skip(state))]
pub async fn get<S: CheckoutBackend, L: LockManager + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderSheet>, ApiError> {
    let sheet_id: OrderSheetId = parse_uuid(&id)?;
    let sheet = state.coordinator.order_sheet(sheet_id).await?;
    Ok(Json(sheet))
}
