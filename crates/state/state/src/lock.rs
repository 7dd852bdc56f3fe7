use std::time::Duration;

use async_trait::async_trait;

use crate::error::StateError;

/// Name of the lock that serializes work on one workflow run.
#[must_use]
pub fn run_lock_name(run_id: &str) -> String {
    format!("run:{run_id}")
}

/// Ownership of a named lock until its TTL runs out.
///
/// The run interpreter holds one for as long as it advances a run and keeps
/// it alive with [`extend`](Self::extend) while slow actions execute. A guard
/// dropped without [`release`](Self::release) leaves the lock to expire.
#[async_trait]
pub trait LockGuard: Send + Sync {
    /// Move the expiry to `duration` from now. Fails with
    /// [`StateError::LockExpired`] once the lock lapsed or changed owner.
    async fn extend(&self, duration: Duration) -> Result<(), StateError>;

    /// Give the lock up. A lapsed guard never frees a newer holder.
    async fn release(self: Box<Self>) -> Result<(), StateError>;

    async fn is_held(&self) -> Result<bool, StateError>;
}

/// Mutual exclusion across engine instances.
///
/// Advancing, resuming and cancelling a run all happen under the run's lock
/// (see [`run_lock_name`]), so at most one task mutates a run at a time.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Take `name` for `ttl` if nobody holds it. `None` when it is taken.
    async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Box<dyn LockGuard>>, StateError>;

    /// Take `name`, waiting up to `timeout` for the current holder.
    /// Gives up with [`StateError::Timeout`].
    async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Box<dyn LockGuard>, StateError>;

    /// Take the lock of run `run_id`.
    async fn acquire_run(
        &self,
        run_id: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Box<dyn LockGuard>, StateError> {
        self.acquire(&run_lock_name(run_id), ttl, timeout).await
    }
}
