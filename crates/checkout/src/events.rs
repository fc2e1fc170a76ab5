//! Events written to the outbox by the payment workflow.

use chrono::{DateTime, Utc};
use common::{BuyerId, Money, OrderId, PaymentId};
use serde::{Deserialize, Serialize};
use store::{Order, OutboxEntry, Payment};

/// Aggregate type of payment events.
pub const AGGREGATE_TYPE: &str = "Payment";

/// Event type emitted once a payment commits.
pub const PAYMENT_COMPLETED: &str = "orderPaymentComplete";

/// Payload of the payment-completed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCompleted {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub order_number: String,
    pub buyer_id: BuyerId,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
}

impl PaymentCompleted {
    pub fn new(order: &Order, payment: &Payment) -> Self {
        Self {
            payment_id: payment.id,
            order_id: order.id,
            order_number: order.order_number.clone(),
            buyer_id: payment.buyer_id,
            amount: payment.amount,
            paid_at: payment.paid_at,
        }
    }

    /// Builds the `INIT` outbox entry keyed by the payment id.
    pub fn to_outbox_entry(&self) -> Result<OutboxEntry, serde_json::Error> {
        OutboxEntry::new(AGGREGATE_TYPE, self.payment_id, PAYMENT_COMPLETED, self)
    }
}
