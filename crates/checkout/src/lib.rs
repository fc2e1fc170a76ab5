//! Checkout workflows.
//!
//! Two short critical sections turn a cart into a paid order:
//! - `create_order`: lock `create-order:{sheetId}`, validate every line,
//!   deduct stock, insert the order, complete the sheet
//! - `pay_order`: lock `payment-order:{orderId}`, debit the balance, commit
//!   the payment together with its outbox entry, notify the collector
//!
//! Order sheets are staged beforehand through [`OrderSheetService`].

pub mod collector;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod order_sheet;

pub use collector::{
    CollectedOrder, CollectorError, HttpOrderCollector, InMemoryCollector, LoggingCollector,
    OrderCollector,
};
pub use coordinator::{
    CoordinatorConfig, CreateOrderRequest, OrderLine, OrderPaymentCoordinator, create_order_lock,
    payment_order_lock,
};
pub use error::{CheckoutError, Result};
pub use events::{AGGREGATE_TYPE, PAYMENT_COMPLETED, PaymentCompleted};
pub use order_sheet::{DEFAULT_SHEET_TTL, OrderSheetService, StageRequest};
