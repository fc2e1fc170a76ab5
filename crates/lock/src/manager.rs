use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use crate::{LockError, Result};

/// Wait and lease bounds for a single acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// How long to queue for a contended lock. Zero fails immediately.
    pub wait: Duration,
    /// How long the lease survives without an explicit release.
    pub lease: Duration,
}

impl LockOptions {
    pub fn new(wait: Duration, lease: Duration) -> Self {
        Self { wait, lease }
    }

    /// Fail-fast acquisition with the given lease.
    pub fn no_wait(lease: Duration) -> Self {
        Self {
            wait: Duration::ZERO,
            lease,
        }
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        Self::no_wait(Duration::from_secs(3))
    }
}

/// Proof of a held lease.
///
/// Handles are only created by a successful acquisition and are consumed by
/// release, so a handle cannot be released twice.
#[derive(Debug)]
pub struct LockHandle {
    name: String,
    token: Uuid,
    acquired_at: Instant,
    lease: Duration,
}

impl LockHandle {
    /// Creates a handle for a lease that was just granted.
    pub fn new(name: impl Into<String>, lease: Duration) -> Self {
        Self {
            name: name.into(),
            token: Uuid::new_v4(),
            acquired_at: Instant::now(),
            lease,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owner token stored alongside the lease.
    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Returns true once the lease duration has elapsed locally.
    pub fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.lease
    }

    /// Error describing a release that found no matching lease.
    pub(crate) fn release_error(&self) -> LockError {
        if self.is_expired() {
            LockError::Expired {
                name: self.name.clone(),
            }
        } else {
            LockError::NotHeld {
                name: self.name.clone(),
            }
        }
    }
}

/// A named, lease-based mutex.
///
/// Implementations must be thread-safe and must only let the current holder
/// release a lock.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Acquires the lock `name`, queueing for at most `options.wait`.
    ///
    /// Fails with [`LockError::NotAcquired`] when the wait window closes while
    /// the lock is still held elsewhere. Never retries beyond the window.
    async fn acquire(&self, name: &str, options: LockOptions) -> Result<LockHandle>;

    /// Releases a held lock.
    ///
    /// Returns [`LockError::Expired`] if the lease already ran out and
    /// [`LockError::NotHeld`] if the caller is not the holder.
    async fn release(&self, handle: LockHandle) -> Result<()>;
}

/// Repeats `attempt` until it yields a handle, the wait window closes, or the
/// interrupt signal flips.
pub(crate) async fn acquire_with_retry<F, Fut>(
    name: &str,
    wait: Duration,
    retry_interval: Duration,
    mut interrupt: watch::Receiver<bool>,
    mut attempt: F,
) -> Result<LockHandle>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<LockHandle>>>,
{
    let deadline = Instant::now() + wait;

    loop {
        if *interrupt.borrow_and_update() {
            return Err(LockError::Interrupted {
                name: name.to_string(),
            });
        }

        if let Some(handle) = attempt().await? {
            return Ok(handle);
        }

        let now = Instant::now();
        if now >= deadline {
            metrics::counter!("lock_acquire_failures_total").increment(1);
            return Err(LockError::NotAcquired {
                name: name.to_string(),
            });
        }

        let pause = retry_interval.min(deadline - now);
        tokio::select! {
            () = tokio::time::sleep(pause) => {}
            _ = interrupt.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_fail_fast_with_three_second_lease() {
        let options = LockOptions::default();
        assert_eq!(options.wait, Duration::ZERO);
        assert_eq!(options.lease, Duration::from_secs(3));
    }

    #[test]
    fn handles_get_distinct_tokens() {
        let a = LockHandle::new("create-order:1", Duration::from_secs(3));
        let b = LockHandle::new("create-order:1", Duration::from_secs(3));
        assert_ne!(a.token(), b.token());
        assert_eq!(a.name(), "create-order:1");
    }

    #[test]
    fn release_error_distinguishes_expiry() {
        let live = LockHandle::new("x", Duration::from_secs(60));
        assert!(matches!(live.release_error(), LockError::NotHeld { .. }));

        let expired = LockHandle::new("x", Duration::ZERO);
        assert!(expired.is_expired());
        assert!(matches!(expired.release_error(), LockError::Expired { .. }));
    }
}
