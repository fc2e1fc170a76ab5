//! Staging of carts into order sheets.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{BuyerId, CartLineId, OrderSheetId};
use serde::{Deserialize, Serialize};
use store::{ItemStatus, LineItem, OrderItemSheet, OrderSheet, OrderSheetStore};

use crate::{CheckoutError, Result};

/// Default lifetime of a staged sheet.
pub const DEFAULT_SHEET_TTL: Duration = Duration::from_secs(3 * 60 * 60);

/// A cart selection to stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRequest {
    pub buyer_id: BuyerId,
    pub buyer_name: String,
    pub cart_line_ids: Vec<CartLineId>,
    /// Product/option snapshot per line, priced at staging time.
    pub lines: Vec<LineItem>,
}

/// Keeps at most one live order sheet per buyer.
pub struct OrderSheetService<S: OrderSheetStore> {
    store: S,
    ttl: chrono::Duration,
}

impl<S: OrderSheetStore> OrderSheetService<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self {
            store,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(3)),
        }
    }

    /// Stages a cart, reusing the buyer's live sheet when it was staged from
    /// the same cart lines.
    pub async fn stage(&self, request: StageRequest) -> Result<OrderSheet> {
        self.stage_at(request, Utc::now()).await
    }

    /// [`stage`](Self::stage) evaluated at `now`.
    #[tracing::instrument(skip(self, request), fields(buyer_id = %request.buyer_id))]
    pub async fn stage_at(&self, request: StageRequest, now: DateTime<Utc>) -> Result<OrderSheet> {
        if request.lines.is_empty() {
            return Err(CheckoutError::InvalidRequest(
                "an order sheet needs at least one line".to_string(),
            ));
        }
        if request.lines.iter().any(|line| line.quantity == 0) {
            return Err(CheckoutError::InvalidRequest(
                "line quantities must be positive".to_string(),
            ));
        }
        if let Some(line) = request.lines.iter().find(|line| line.unit_price.is_negative()) {
            return Err(CheckoutError::InvalidRequest(format!(
                "unit price of product {} must not be negative, got {}",
                line.product_id, line.unit_price
            )));
        }
        let (total_quantity, total_price) = store::model::totals(&request.lines)?;

        let mut cart_line_ids = request.cart_line_ids;
        cart_line_ids.sort_unstable();

        if let Some(existing) = self.store.find_sheet_by_buyer(request.buyer_id).await? {
            if existing.is_expired_at(now) {
                self.store.delete_sheet(existing.id).await?;
                tracing::info!(sheet_id = %existing.id, "expired order sheet removed");
            } else if existing.cart_line_ids == cart_line_ids {
                tracing::debug!(sheet_id = %existing.id, "reusing live order sheet");
                return Ok(existing);
            }
        }

        let sheet = OrderSheet {
            id: OrderSheetId::new(),
            buyer_id: request.buyer_id,
            buyer_name: request.buyer_name,
            total_quantity,
            total_price,
            cart_line_ids,
            created_at: now,
            expires_at: now + self.ttl,
            items: request
                .lines
                .into_iter()
                .map(|line| OrderItemSheet {
                    line,
                    status: ItemStatus::Waiting,
                })
                .collect(),
        };
        self.store.save_sheet(&sheet).await?;

        tracing::info!(sheet_id = %sheet.id, items = sheet.items.len(), "order sheet staged");
        Ok(sheet)
    }

    /// Returns a live sheet.
    pub async fn get(&self, sheet_id: OrderSheetId) -> Result<OrderSheet> {
        self.get_at(sheet_id, Utc::now()).await
    }

    /// [`get`](Self::get) evaluated at `now`. Expired sheets count as missing.
    pub async fn get_at(&self, sheet_id: OrderSheetId, now: DateTime<Utc>) -> Result<OrderSheet> {
        self.store
            .find_sheet(sheet_id)
            .await?
            .filter(|sheet| !sheet.is_expired_at(now))
            .ok_or(CheckoutError::OrderSheetNotFound(sheet_id))
    }

    /// Deletes the sheet and its items.
    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, sheet_id: OrderSheetId) -> Result<()> {
        if self.store.delete_sheet(sheet_id).await? {
            Ok(())
        } else {
            Err(CheckoutError::OrderSheetNotFound(sheet_id))
        }
    }
}
