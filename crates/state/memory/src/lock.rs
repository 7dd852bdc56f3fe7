use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use uuid::Uuid;

use cadence_state::error::StateError;
use cadence_state::lock::{DistributedLock, LockGuard};

/// Poll interval while waiting on a contended lock.
const ACQUIRE_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
struct Holder {
    owner: String,
    expires_at: Instant,
}

impl Holder {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process [`DistributedLock`] for single-node deployments and tests.
///
/// Expired holders are replaced on the next acquire attempt.
#[derive(Debug, Clone, Default)]
pub struct MemoryDistributedLock {
    holders: Arc<DashMap<String, Holder>>,
}

impl MemoryDistributedLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for MemoryDistributedLock {
    async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<Box<dyn LockGuard>>, StateError> {
        let owner = Uuid::new_v4().to_string();
        let holder = Holder {
            owner: owner.clone(),
            expires_at: Instant::now() + ttl,
        };

        let acquired = match self.holders.entry(name.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(holder);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(holder);
                true
            }
        };

        Ok(acquired.then(|| {
            Box::new(MemoryLockGuard {
                holders: Arc::clone(&self.holders),
                name: name.to_owned(),
                owner,
            }) as Box<dyn LockGuard>
        }))
    }

    async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Box<dyn LockGuard>, StateError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_acquire(name, ttl).await? {
                return Ok(guard);
            }
            if Instant::now() >= deadline {
                return Err(StateError::Timeout(timeout));
            }
            tokio::time::sleep(ACQUIRE_POLL).await;
        }
    }
}

/// Guard for a lock acquired via [`MemoryDistributedLock`].
#[derive(Debug)]
pub struct MemoryLockGuard {
    holders: Arc<DashMap<String, Holder>>,
    name: String,
    owner: String,
}

#[async_trait]
impl LockGuard for MemoryLockGuard {
    async fn extend(&self, duration: Duration) -> Result<(), StateError> {
        let mut holder = self
            .holders
            .get_mut(&self.name)
            .filter(|h| h.owner == self.owner && !h.is_expired())
            .ok_or_else(|| StateError::LockExpired(self.name.clone()))?;
        holder.expires_at = Instant::now() + duration;
        Ok(())
    }

    async fn release(self: Box<Self>) -> Result<(), StateError> {
        self.holders
            .remove_if(&self.name, |_, holder| holder.owner == self.owner);
        Ok(())
    }

    async fn is_held(&self) -> Result<bool, StateError> {
        Ok(self
            .holders
            .get(&self.name)
            .is_some_and(|h| h.owner == self.owner && !h.is_expired()))
    }
}
