use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

use crate::manager::{LockHandle, LockManager, LockOptions, acquire_with_retry};
use crate::{LockError, Result};

#[derive(Debug)]
struct Lease {
    token: Uuid,
    expires_at: Instant,
}

/// In-process lock manager.
///
/// Leases live in a shared table; clones share the same table, so every
/// worker holding a clone contends on the same names.
#[derive(Clone)]
pub struct InMemoryLockManager {
    leases: Arc<Mutex<HashMap<String, Lease>>>,
    interrupt: Arc<watch::Sender<bool>>,
    retry_interval: Duration,
}

impl InMemoryLockManager {
    /// Creates a manager that re-checks contended locks every 10ms.
    pub fn new() -> Self {
        Self::with_retry_interval(Duration::from_millis(10))
    }

    pub fn with_retry_interval(retry_interval: Duration) -> Self {
        let (interrupt, _) = watch::channel(false);
        Self {
            leases: Arc::new(Mutex::new(HashMap::new())),
            interrupt: Arc::new(interrupt),
            retry_interval,
        }
    }

    /// Wakes every waiter with [`LockError::Interrupted`] and rejects new waits.
    pub fn interrupt_waiters(&self) {
        self.interrupt.send_replace(true);
    }

    /// Returns true if `name` is currently leased.
    pub async fn is_held(&self, name: &str) -> bool {
        let leases = self.leases.lock().await;
        leases
            .get(name)
            .is_some_and(|lease| lease.expires_at > Instant::now())
    }

    async fn try_acquire(&self, name: &str, lease: Duration) -> Result<Option<LockHandle>> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();

        if let Some(current) = leases.get(name)
            && current.expires_at > now
        {
            return Ok(None);
        }

        let handle = LockHandle::new(name, lease);
        leases.insert(
            name.to_string(),
            Lease {
                token: handle.token(),
                expires_at: now + lease,
            },
        );
        Ok(Some(handle))
    }
}

impl Default for InMemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
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

    async fn release(&self, handle: LockHandle) -> Result<()> {
        let mut leases = self.leases.lock().await;

        match leases.get(handle.name()) {
            Some(lease) if lease.token == handle.token() => {
                let live = lease.expires_at > Instant::now();
                leases.remove(handle.name());
                if live {
                    Ok(())
                } else {
                    Err(LockError::Expired {
                        name: handle.name().to_string(),
                    })
                }
            }
            _ => Err(handle.release_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(ms: u64) -> LockOptions {
        LockOptions::no_wait(Duration::from_millis(ms))
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let locks = InMemoryLockManager::new();

        let handle = locks.acquire("create-order:1", lease(3000)).await.unwrap();
        assert!(locks.is_held("create-order:1").await);

        locks.release(handle).await.unwrap();
        assert!(!locks.is_held("create-order:1").await);
    }

    #[tokio::test]
    async fn zero_wait_fails_when_contended() {
        let locks = InMemoryLockManager::new();
        let _held = locks.acquire("payment-order:1", lease(3000)).await.unwrap();

        let result = locks.acquire("payment-order:1", lease(3000)).await;
        assert!(matches!(result, Err(LockError::NotAcquired { .. })));
    }

    #[tokio::test]
    async fn different_names_do_not_contend() {
        let locks = InMemoryLockManager::new();
        let _a = locks.acquire("create-order:1", lease(3000)).await.unwrap();
        let b = locks.acquire("create-order:2", lease(3000)).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let locks = InMemoryLockManager::new();
        let stale = locks.acquire("create-order:1", lease(20)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let fresh = locks.acquire("create-order:1", lease(3000)).await.unwrap();

        let result = locks.release(stale).await;
        assert!(matches!(result, Err(LockError::Expired { .. })));

        // The takeover is untouched by the stale release.
        assert!(locks.is_held("create-order:1").await);
        locks.release(fresh).await.unwrap();
    }

    #[tokio::test]
    async fn release_of_expired_but_untaken_lease_reports_expiry() {
        let locks = InMemoryLockManager::new();
        let handle = locks.acquire("create-order:1", lease(10)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let result = locks.release(handle).await;
        assert!(matches!(result, Err(LockError::Expired { .. })));
        assert!(!locks.is_held("create-order:1").await);
    }

    #[tokio::test]
    async fn release_by_non_holder_is_rejected() {
        let locks = InMemoryLockManager::new();
        let _held = locks.acquire("create-order:1", lease(3000)).await.unwrap();

        let forged = LockHandle::new("create-order:1", Duration::from_secs(3));
        let result = locks.release(forged).await;
        assert!(matches!(result, Err(LockError::NotHeld { .. })));
        assert!(locks.is_held("create-order:1").await);
    }

    #[tokio::test]
    async fn bounded_wait_succeeds_once_holder_releases() {
        let locks = InMemoryLockManager::new();
        let held = locks.acquire("create-order:1", lease(3000)).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .acquire(
                        "create-order:1",
                        LockOptions::new(Duration::from_secs(2), Duration::from_secs(3)),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        locks.release(held).await.unwrap();

        let handle = waiter.await.unwrap().unwrap();
        assert_eq!(handle.name(), "create-order:1");
    }

    #[tokio::test]
    async fn bounded_wait_times_out() {
        let locks = InMemoryLockManager::new();
        let _held = locks.acquire("create-order:1", lease(3000)).await.unwrap();

        let started = Instant::now();
        let result = locks
            .acquire(
                "create-order:1",
                LockOptions::new(Duration::from_millis(50), Duration::from_secs(3)),
            )
            .await;

        assert!(matches!(result, Err(LockError::NotAcquired { .. })));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn interrupt_wakes_waiters() {
        let locks = InMemoryLockManager::new();
        let _held = locks.acquire("create-order:1", lease(3000)).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .acquire(
                        "create-order:1",
                        LockOptions::new(Duration::from_secs(5), Duration::from_secs(3)),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        locks.interrupt_waiters();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(LockError::Interrupted { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquirers_get_exactly_one_lease() {
        let locks = InMemoryLockManager::new();
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    locks.acquire("payment-order:7", lease(3000)).await
                })
            })
            .collect();

        let mut acquired = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 1);
    }
}
