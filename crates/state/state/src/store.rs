use std::time::Duration;

use async_trait::async_trait;

use crate::error::StateError;
use crate::key::{KeyKind, StateKey};

/// Result of a [`StateStore::compare_and_swap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// The stored value matched and was replaced.
    Ok,
    /// The stored value differed; nothing was written.
    Conflict { current_value: Option<String> },
}

/// Persistence for runs, admission counters, cooldowns and continuations.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// Counter updates must be atomic: admission control relies on `increment`
/// returning the post-increment value without a read-modify-write race.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Check if a key exists; if not, set it atomically with an optional TTL.
    /// Returns `true` if the key was newly set, `false` if it already existed.
    async fn check_and_set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError>;

    /// Get the value for a key. Returns `None` if not found or expired.
    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError>;

    /// Set a value with an optional TTL, overwriting any previous value.
    async fn set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StateError>;

    /// Delete a key. Returns `true` if the key existed.
    async fn delete(&self, key: &StateKey) -> Result<bool, StateError>;

    /// Replace the value of `key` only if it currently equals `expected`.
    /// A missing or expired key never matches.
    async fn compare_and_swap(
        &self,
        key: &StateKey,
        expected: &str,
        new_value: &str,
        ttl: Option<Duration>,
    ) -> Result<CasResult, StateError>;

    /// Atomically increment a counter by `delta`. Returns the new value.
    /// Creates the counter at 0 if it doesn't exist before incrementing.
    /// The TTL is only applied when the counter is created.
    async fn increment(
        &self,
        key: &StateKey,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StateError>;

    /// Scan live keys of one kind in a namespace whose id starts with
    /// `prefix`. Returns `(canonical key, value)` pairs sorted by key.
    ///
    /// This operation may be expensive on some backends. Use sparingly.
    async fn scan_keys(
        &self,
        namespace: &str,
        kind: KeyKind,
        prefix: Option<&str>,
    ) -> Result<Vec<(String, String)>, StateError>;

    /// Scan all keys of a given kind across every namespace.
    async fn scan_keys_by_kind(&self, kind: KeyKind)
    -> Result<Vec<(String, String)>, StateError>;

    /// Register a suspended run in the continuation index, due at
    /// `fire_at_ms` (Unix milliseconds). Re-indexing replaces the due time.
    async fn index_continuation(&self, key: &StateKey, fire_at_ms: i64) -> Result<(), StateError> {
        let _ = (key, fire_at_ms);
        Ok(())
    }

    /// Remove a run from the continuation index.
    async fn remove_continuation_index(&self, key: &StateKey) -> Result<(), StateError> {
        let _ = key;
        Ok(())
    }

    /// Canonical keys of continuations due at or before `now_ms`.
    ///
    /// The default implementation falls back to scanning every
    /// [`KeyKind::PendingRuns`] key, so callers must re-check the due time.
    async fn get_due_continuations(&self, now_ms: i64) -> Result<Vec<String>, StateError> {
        let _ = now_ms;
        let entries = self.scan_keys_by_kind(KeyKind::PendingRuns).await?;
        Ok(entries.into_iter().map(|(k, _)| k).collect())
    }
}
