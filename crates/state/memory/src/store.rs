use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tokio::time::Instant;

use cadence_state::error::StateError;
use cadence_state::key::{KeyKind, StateKey};
use cadence_state::store::{CasResult, StateStore};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            value: value.into(),
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-memory [`StateStore`] backed by [`DashMap`]s.
///
/// Entries are lazily evicted when touched after their TTL has elapsed.
/// Counter increments hold the map shard lock for the whole
/// read-modify-write, so they are atomic across tasks.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    data: DashMap<String, Entry>,
    /// Continuation index: canonical key to due time in Unix milliseconds.
    continuations: DashMap<String, i64>,
}

impl MemoryStateStore {
    /// Create a new, empty in-memory state store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, for diagnostics.
    pub fn len(&self) -> usize {
        self.data.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_entries(&self, matches: impl Fn(&str) -> bool) -> Vec<(String, String)> {
        let mut found: Vec<(String, String)> = self
            .data
            .iter()
            .filter(|e| !e.is_expired() && matches(e.key()))
            .map(|e| (e.key().clone(), e.value.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn check_and_set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError> {
        match self.data.entry(key.canonical()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(Entry::new(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        let rendered = key.canonical();
        if let Some(entry) = self.data.get(&rendered) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove_if(&rendered, |_, e| e.is_expired());
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StateError> {
        self.data.insert(key.canonical(), Entry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &StateKey) -> Result<bool, StateError> {
        match self.data.remove(&key.canonical()) {
            Some((_, entry)) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &StateKey,
        expected: &str,
        new_value: &str,
        ttl: Option<Duration>,
    ) -> Result<CasResult, StateError> {
        match self.data.entry(key.canonical()) {
            MapEntry::Occupied(mut occupied) if !occupied.get().is_expired() => {
                if occupied.get().value == expected {
                    occupied.insert(Entry::new(new_value, ttl));
                    Ok(CasResult::Ok)
                } else {
                    Ok(CasResult::Conflict {
                        current_value: Some(occupied.get().value.clone()),
                    })
                }
            }
            _ => Ok(CasResult::Conflict {
                current_value: None,
            }),
        }
    }

    async fn increment(
        &self,
        key: &StateKey,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StateError> {
        let rendered = key.canonical();
        let mut entry = self
            .data
            .entry(rendered.clone())
            .or_insert_with(|| Entry::new("0", ttl));

        // An expired counter restarts from zero with a fresh TTL.
        if entry.is_expired() {
            *entry = Entry::new("0", ttl);
        }

        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| StateError::InvalidCounter {
                key: rendered,
                value: entry.value.clone(),
            })?;

        let next = current + delta;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn scan_keys(
        &self,
        namespace: &str,
        kind: KeyKind,
        prefix: Option<&str>,
    ) -> Result<Vec<(String, String)>, StateError> {
        let head = format!("{namespace}:{kind}:{}", prefix.unwrap_or_default());
        Ok(self.live_entries(|k| k.starts_with(&head)))
    }

    async fn scan_keys_by_kind(
        &self,
        kind: KeyKind,
    ) -> Result<Vec<(String, String)>, StateError> {
        let infix = format!(":{kind}:");
        Ok(self.live_entries(|k| {
            k.split_once(':')
                .is_some_and(|(_, rest)| format!(":{rest}").starts_with(&infix))
        }))
    }

    async fn index_continuation(&self, key: &StateKey, fire_at_ms: i64) -> Result<(), StateError> {
        self.continuations.insert(key.canonical(), fire_at_ms);
        Ok(())
    }

    async fn remove_continuation_index(&self, key: &StateKey) -> Result<(), StateError> {
        self.continuations.remove(&key.canonical());
        Ok(())
    }

    async fn get_due_continuations(&self, now_ms: i64) -> Result<Vec<String>, StateError> {
        let mut due: Vec<(i64, String)> = self
            .continuations
            .iter()
            .filter(|e| *e.value() <= now_ms)
            .map(|e| (*e.value(), e.key().clone()))
            .collect();
        due.sort();
        Ok(due.into_iter().map(|(_, k)| k).collect())
    }
}
