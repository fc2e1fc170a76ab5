pub mod error;
pub mod memory;
pub mod model;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use model::{
    BalanceChange, BalanceHistory, ItemStatus, LineItem, Order, OrderItem, OrderItemSheet,
    OrderSheet, Payment,
};
pub use outbox::{OutboxEntry, OutboxStatus};
pub use postgres::PostgresStore;
pub use store::{
    BalanceLedger, InventoryStore, OrderSheetStore, OrderStore, OutboxStore, PaymentStore,
};
