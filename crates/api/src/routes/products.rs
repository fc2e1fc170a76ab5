//! Stock lookup endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::{OptionId, ProductId};
use lock::LockManager;
use serde::{Deserialize, Serialize};

use super::{AppState, CheckoutBackend, parse_numeric};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct StockQuery {
    pub option_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StockResponse {
    pub product_id: ProductId,
    pub option_id: Option<OptionId>,
    pub stock: u32,
}

/// GET /products/:id/stock?option_id=
#[tracing::instrument(skip(state))]
pub async fn stock<S: CheckoutBackend, L: LockManager + 'static>(
    State(state): State<Arc<AppState<S, L>>>,
    Path(id): Path<String>,
    Query(query): Query<StockQuery>,
) -> Result<Json<StockResponse>, ApiError> {
    let product_id: ProductId = parse_numeric(&id)?;
    let option_id = query.option_id.map(OptionId::new);
    let stock = state.coordinator.stock(product_id, option_id).await?;
    Ok(Json(StockResponse {
        product_id,
        option_id,
        stock,
    }))
}
