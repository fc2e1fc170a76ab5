use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::watch;

use crate::manager::{LockHandle, LockManager, LockOptions, acquire_with_retry};
use crate::{LockError, Result};

/// PostgreSQL-backed lock manager.
///
/// Each lock is a row in `distributed_locks`. A row whose `expires_at` has
/// passed is free and is taken over with a conditional upsert, so a crashed
/// holder blocks others for at most its lease. Expiry is judged by the
/// database clock.
#[derive(Clone)]
pub struct PostgresLockManager {
    pool: PgPool,
    interrupt: Arc<watch::Sender<bool>>,
    retry_interval: Duration,
}

impl PostgresLockManager {
    /// Creates a manager that re-checks contended locks every 50ms.
    pub fn new(pool: PgPool) -> Self {
        Self::with_retry_interval(pool, Duration::from_millis(50))
    }

    pub fn with_retry_interval(pool: PgPool, retry_interval: Duration) -> Self {
        let (interrupt, _) = watch::channel(false);
        Self {
            pool,
            interrupt: Arc::new(interrupt),
            retry_interval,
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Wakes every waiter with [`LockError::Interrupted`] and rejects new waits.
    pub fn interrupt_waiters(&self) {
        self.interrupt.send_replace(true);
    }

    async fn try_acquire(&self, name: &str, lease: Duration) -> Result<Option<LockHandle>> {
        let handle = LockHandle::new(name, lease);

        let result = sqlx::query(
            r#"
            INSERT INTO distributed_locks (name, token, expires_at)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            ON CONFLICT (name) DO UPDATE SET
                token = EXCLUDED.token,
                expires_at = EXCLUDED.expires_at
            WHERE distributed_locks.expires_at <= now()
            "#,
        )
        .bind(name)
        .bind(handle.token())
        .bind(lease.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok((result.rows_affected() == 1).then_some(handle))
    }
}

#[async_trait]
impl LockManager for PostgresLockManager {
    #[tracing::instrument(skip(self))]
    async fn acquire(&self, name: &str, options: LockOptions) -> Result<LockHandle> {
        acquire_with_retry(
            name,
            options.wait,
            self.retry_interval,
            self.interrupt.subscribe(),
            || self.try_acquire(name, options.lease),
        )
        .await
    }

    #[tracing::instrument(skip(self, handle), fields(name = handle.name()))]
    async fn release(&self, handle: LockHandle) -> Result<()> {
        let live: Option<bool> = sqlx::query_scalar(
            r#"
            DELETE FROM distributed_locks
            WHERE name = $1 AND token = $2
            RETURNING expires_at > now()
            "#,
        )
        .bind(handle.name())
        .bind(handle.token())
        .fetch_optional(&self.pool)
        .await?;

        match live {
            Some(true) => Ok(()),
            Some(false) => Err(LockError::Expired {
                name: handle.name().to_string(),
            }),
            None => Err(handle.release_error()),
        }
    }
}
