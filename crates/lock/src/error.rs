use thiserror::Error;

/// Errors returned by lock managers.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock stayed contended for the whole wait window.
    #[error("Lock not acquired: {name}")]
    NotAcquired { name: String },

    /// The wait was aborted before the lock became free.
    #[error("Interrupted while waiting for lock: {name}")]
    Interrupted { name: String },

    /// The lease ran out before the holder released it.
    #[error("Lock lease expired before release: {name}")]
    Expired { name: String },

    /// The caller does not hold the lock it tried to release.
    #[error("Lock is not held by the caller: {name}")]
    NotHeld { name: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LockError {
    /// Returns true for the two release-time outcomes, which happen after the
    /// protected work is already done.
    pub fn is_release_failure(&self) -> bool {
        matches!(self, LockError::Expired { .. } | LockError::NotHeld { .. })
    }
}

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;
