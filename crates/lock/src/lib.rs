//! Distributed lock manager.
//!
//! A lock is a named lease: whoever holds the lease may run the protected
//! section, and the lease expires on its own if the holder disappears. Two
//! backends are provided:
//! - [`InMemoryLockManager`] for a single process and for tests
//! - [`PostgresLockManager`] backed by a `distributed_locks` table

pub mod error;
pub mod manager;
pub mod memory;
pub mod postgres;

pub use error::{LockError, Result};
pub use manager::{LockHandle, LockManager, LockOptions};
pub use memory::InMemoryLockManager;
pub use postgres::PostgresLockManager;
