use std::time::Duration;

use crate::error::StateError;
use crate::key::{KeyKind, StateKey};
use crate::lock::{DistributedLock, run_lock_name};
use crate::store::{CasResult, StateStore};

fn test_key(kind: KeyKind, id: &str) -> StateKey {
    StateKey::new("conformance", kind, id)
}

/// Run the full state store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_store_conformance_tests(store: &dyn StateStore) -> Result<(), StateError> {
    test_get_missing(store).await?;
    test_set_and_get(store).await?;
    test_check_and_set(store).await?;
    test_compare_and_swap(store).await?;
    test_delete(store).await?;
    test_increment(store).await?;
    test_scan_keys(store).await?;
    test_continuation_index(store).await?;
    Ok(())
}

async fn test_get_missing(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Run, "missing");
    assert!(
        store.get(&key).await?.is_none(),
        "get on missing key should return None"
    );
    Ok(())
}

async fn test_set_and_get(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Run, "run-1");
    store.set(&key, r#"{"status":"running"}"#, None).await?;
    assert_eq!(
        store.get(&key).await?.as_deref(),
        Some(r#"{"status":"running"}"#)
    );

    store.set(&key, r#"{"status":"completed"}"#, None).await?;
    assert_eq!(
        store.get(&key).await?.as_deref(),
        Some(r#"{"status":"completed"}"#),
        "set should overwrite"
    );
    Ok(())
}

async fn test_check_and_set(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Cooldown, "wf-1:user-1");
    let created = store
        .check_and_set(&key, "claimed", Some(Duration::from_secs(3600)))
        .await?;
    assert!(created, "check_and_set on new key should return true");

    let created = store.check_and_set(&key, "again", None).await?;
    assert!(!created, "check_and_set on existing key should return false");
    assert_eq!(
        store.get(&key).await?.as_deref(),
        Some("claimed"),
        "original value should remain"
    );
    Ok(())
}

async fn test_compare_and_swap(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::Run, "run-cas");
    let missing = store.compare_and_swap(&key, "", "created", None).await?;
    assert_eq!(
        missing,
        CasResult::Conflict {
            current_value: None
        },
        "compare_and_swap never creates a key"
    );

    store.set(&key, "v1", None).await?;
    let stale = store.compare_and_swap(&key, "v0", "v2", None).await?;
    assert_eq!(
        stale,
        CasResult::Conflict {
            current_value: Some("v1".into())
        },
        "a stale expectation should conflict"
    );
    assert_eq!(store.get(&key).await?.as_deref(), Some("v1"));

    let swapped = store.compare_and_swap(&key, "v1", "v2", None).await?;
    assert_eq!(swapped, CasResult::Ok, "matching expectation should swap");
    assert_eq!(store.get(&key).await?.as_deref(), Some("v2"));
    Ok(())
}

async fn test_delete(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::CancelRequest, "run-9");
    store.set(&key, "ops", None).await?;
    assert!(store.delete(&key).await?, "delete should report existing key");
    assert!(store.get(&key).await?.is_none(), "get after delete should return None");
    assert!(!store.delete(&key).await?, "delete on missing key should return false");
    Ok(())
}

async fn test_increment(store: &dyn StateStore) -> Result<(), StateError> {
    let key = test_key(KeyKind::DailyRuns, "wf-1:2026-03-02");
    assert_eq!(store.increment(&key, 1, None).await?, 1, "counter starts at zero");
    assert_eq!(store.increment(&key, 1, None).await?, 2);
    assert_eq!(store.increment(&key, -1, None).await?, 1, "rollback decrements");

    let text = test_key(KeyKind::DailyRuns, "not-a-number");
    store.set(&text, "abc", None).await?;
    assert!(
        matches!(
            store.increment(&text, 1, None).await,
            Err(StateError::InvalidCounter { .. })
        ),
        "incrementing a non-integer should fail"
    );
    Ok(())
}

async fn test_scan_keys(store: &dyn StateStore) -> Result<(), StateError> {
    store
        .set(&test_key(KeyKind::RunIndex, "wf-a:r2"), "r2", None)
        .await?;
    store
        .set(&test_key(KeyKind::RunIndex, "wf-a:r1"), "r1", None)
        .await?;
    store
        .set(&test_key(KeyKind::RunIndex, "wf-b:r3"), "r3", None)
        .await?;
    store
        .set(&StateKey::new("elsewhere", KeyKind::RunIndex, "wf-a:r4"), "r4", None)
        .await?;

    let found = store
        .scan_keys("conformance", KeyKind::RunIndex, Some("wf-a:"))
        .await?;
    let values: Vec<&str> = found.iter().map(|(_, v)| v.as_str()).collect();
    assert_eq!(values, vec!["r1", "r2"], "scan filters by namespace and prefix");

    let all = store.scan_keys_by_kind(KeyKind::RunIndex).await?;
    assert_eq!(all.len(), 4, "scan by kind crosses namespaces");
    Ok(())
}

async fn test_continuation_index(store: &dyn StateStore) -> Result<(), StateError> {
    let early = test_key(KeyKind::PendingRuns, "run-early");
    let late = test_key(KeyKind::PendingRuns, "run-late");
    store.set(&early, "1000", None).await?;
    store.set(&late, "5000", None).await?;
    store.index_continuation(&early, 1_000).await?;
    store.index_continuation(&late, 5_000).await?;

    let due = store.get_due_continuations(2_000).await?;
    assert!(due.contains(&early.canonical()), "early continuation is due");

    store.remove_continuation_index(&early).await?;
    store.delete(&early).await?;
    let due = store.get_due_continuations(10_000).await?;
    assert!(!due.contains(&early.canonical()), "removed continuation is gone");
    assert!(due.contains(&late.canonical()), "late continuation is due");

    store.remove_continuation_index(&late).await?;
    store.delete(&late).await?;
    Ok(())
}

/// Run the full distributed lock conformance test suite.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_lock_conformance_tests(lock: &dyn DistributedLock) -> Result<(), StateError> {
    test_try_acquire_and_release(lock).await?;
    test_try_acquire_contention(lock).await?;
    test_lock_extend(lock).await?;
    test_run_lock(lock).await?;
    Ok(())
}

async fn test_try_acquire_and_release(lock: &dyn DistributedLock) -> Result<(), StateError> {
    let guard = lock
        .try_acquire("run:conformance-1", Duration::from_secs(10))
        .await?
        .expect("should acquire uncontested lock");
    assert!(guard.is_held().await?, "lock should be held");
    guard.release().await?;

    let again = lock
        .try_acquire("run:conformance-1", Duration::from_secs(10))
        .await?;
    assert!(again.is_some(), "released lock should be free");
    if let Some(guard) = again {
        guard.release().await?;
    }
    Ok(())
}

async fn test_try_acquire_contention(lock: &dyn DistributedLock) -> Result<(), StateError> {
    let held = lock
        .try_acquire("run:conformance-2", Duration::from_secs(10))
        .await?
        .expect("should acquire uncontested lock");

    let second = lock
        .try_acquire("run:conformance-2", Duration::from_secs(10))
        .await?;
    assert!(second.is_none(), "second acquire should fail while lock is held");

    held.release().await?;
    Ok(())
}

async fn test_lock_extend(lock: &dyn DistributedLock) -> Result<(), StateError> {
    let guard = lock
        .try_acquire("run:conformance-3", Duration::from_secs(5))
        .await?
        .expect("should acquire lock");
    guard.extend(Duration::from_secs(10)).await?;
    assert!(guard.is_held().await?, "lock should still be held after extend");
    guard.release().await?;
    Ok(())
}

async fn test_run_lock(lock: &dyn DistributedLock) -> Result<(), StateError> {
    let guard = lock
        .acquire_run("conformance-4", Duration::from_secs(5), Duration::from_secs(1))
        .await?;
    let by_name = lock
        .try_acquire(&run_lock_name("conformance-4"), Duration::from_secs(5))
        .await?;
    assert!(by_name.is_none(), "run lock should be taken under its run name");
    guard.release().await?;
    Ok(())
}
