use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use cadence_core::WorkflowRun;
use cadence_state::{
    CasResult, DistributedLock, KeyKind, LockGuard, StateError, StateKey, StateStore,
};

use crate::error::EngineError;

/// Cancel markers expire after a week.
const CANCEL_MARKER_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Guarded run writes give up after this many lost races.
const PERSIST_ATTEMPTS: usize = 3;

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Persistence for workflow runs, their continuations and cancel markers.
///
/// Runs are stored as JSON under `{ns}:run:{run_id}` and listed through a
/// per-workflow index `{ns}:run_index:{workflow_id}:{run_id}`. Run ids are
/// time-ordered, so index order is start order.
#[derive(Clone)]
pub struct RunTracker {
    state: Arc<dyn StateStore>,
    lock: Arc<dyn DistributedLock>,
    namespace: String,
}

impl std::fmt::Debug for RunTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunTracker")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl RunTracker {
    pub fn new(
        state: Arc<dyn StateStore>,
        lock: Arc<dyn DistributedLock>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            state,
            lock,
            namespace: namespace.into(),
        }
    }

    fn key(&self, kind: KeyKind, id: impl Into<String>) -> StateKey {
        StateKey::new(self.namespace.as_str(), kind, id)
    }

    /// Store a freshly started run and index it under its workflow.
    /// Nothing is left behind if either write fails.
    pub async fn create(&self, run: &WorkflowRun) -> Result<(), EngineError> {
        let key = self.key(KeyKind::Run, run.id.as_str());
        self.state.set(&key, &serde_json::to_string(run)?, None).await?;

        let index = self.key(KeyKind::RunIndex, format!("{}:{}", run.workflow_id, run.id));
        if let Err(e) = self.state.set(&index, &run.id, None).await {
            if let Err(cleanup) = self.state.delete(&key).await {
                warn!(run.id = %run.id, error = %cleanup, "failed to remove unindexed run");
            }
            return Err(e.into());
        }
        debug!(run.id = %run.id, workflow.id = %run.workflow_id, "run created");
        Ok(())
    }

    /// Write `run` over its stored copy.
    ///
    /// A stored run that already reached a terminal state is never replaced
    /// by a different version of it. The stored run is returned instead and
    /// nothing is written.
    pub async fn persist(&self, run: &WorkflowRun) -> Result<Option<WorkflowRun>, EngineError> {
        let key = self.key(KeyKind::Run, run.id.as_str());
        let json = serde_json::to_string(run)?;
        for _ in 0..PERSIST_ATTEMPTS {
            let Some(raw) = self.state.get(&key).await? else {
                if self.state.check_and_set(&key, &json, None).await? {
                    return Ok(None);
                }
                continue;
            };
            if raw == json {
                return Ok(None);
            }
            let stored: WorkflowRun = serde_json::from_str(&raw)?;
            if stored.is_terminal() && stored != *run {
                debug!(run.id = %run.id, status = ?stored.status, "stored run is final, keeping it");
                return Ok(Some(stored));
            }
            match self.state.compare_and_swap(&key, &raw, &json, None).await? {
                CasResult::Ok => return Ok(None),
                CasResult::Conflict { .. } => debug!(run.id = %run.id, "run changed underneath, retrying"),
            }
        }
        Err(EngineError::LockFailed(format!(
            "run {} is being written concurrently",
            run.id
        )))
    }

    pub async fn load(&self, run_id: &str) -> Result<Option<WorkflowRun>, EngineError> {
        match self.state.get(&self.key(KeyKind::Run, run_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Runs of `workflow_id`, newest first.
    pub async fn list(&self, workflow_id: &str) -> Result<Vec<WorkflowRun>, EngineError> {
        let prefix = format!("{workflow_id}:");
        let mut entries = self
            .state
            .scan_keys(&self.namespace, KeyKind::RunIndex, Some(&prefix))
            .await?;
        entries.reverse();

        let mut runs = Vec::with_capacity(entries.len());
        for (_, run_id) in entries {
            match self.load(&run_id).await? {
                Some(run) => runs.push(run),
                None => warn!(run.id = %run_id, "run index points at a missing run"),
            }
        }
        Ok(runs)
    }

    /// Record that `run` resumes at its `resume_at`.
    pub async fn schedule_continuation(&self, run: &WorkflowRun) -> Result<(), EngineError> {
        match run.resume_at {
            Some(resume_at) => self.schedule_continuation_at(&run.id, resume_at).await,
            None => Ok(()),
        }
    }

    /// Index `run_id` to be resumed at `at`, replacing any earlier due time.
    pub async fn schedule_continuation_at(
        &self,
        run_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let key = self.key(KeyKind::PendingRuns, run_id);
        self.state.set(&key, &at.to_rfc3339(), None).await?;
        self.state.index_continuation(&key, at.timestamp_millis()).await?;
        debug!(run.id = %run_id, resume_at = %at, "continuation scheduled");
        Ok(())
    }

    pub async fn clear_continuation(&self, run_id: &str) -> Result<(), EngineError> {
        let key = self.key(KeyKind::PendingRuns, run_id);
        self.state.remove_continuation_index(&key).await?;
        self.state.delete(&key).await?;
        Ok(())
    }

    /// Ids of runs in this namespace whose continuation is due at `now`.
    pub async fn due_runs(&self, now: DateTime<Utc>) -> Result<Vec<String>, EngineError> {
        let due = self
            .state
            .get_due_continuations(now.timestamp_millis())
            .await?;
        Ok(due
            .iter()
            .filter_map(|canonical| StateKey::parse(canonical))
            .filter(|key| key.namespace == self.namespace && key.kind == KeyKind::PendingRuns)
            .map(|key| key.id)
            .collect())
    }

    /// Mark `run_id` for cancellation. The interpreter honours the marker
    /// before its next action even if the run lock is busy.
    pub async fn request_cancel(&self, run_id: &str, reason: Option<&str>) -> Result<(), EngineError> {
        self.state
            .set(
                &self.key(KeyKind::CancelRequest, run_id),
                reason.unwrap_or_default(),
                Some(CANCEL_MARKER_TTL),
            )
            .await?;
        Ok(())
    }

    /// The pending cancel request for `run_id`: `Some(reason)` if one
    /// exists, with an empty reason mapped to `None` inside.
    pub async fn cancel_requested(&self, run_id: &str) -> Result<Option<Option<String>>, EngineError> {
        let marker = self.state.get(&self.key(KeyKind::CancelRequest, run_id)).await?;
        Ok(marker.map(|reason| (!reason.is_empty()).then_some(reason)))
    }

    pub async fn clear_cancel_request(&self, run_id: &str) -> Result<(), EngineError> {
        self.state
            .delete(&self.key(KeyKind::CancelRequest, run_id))
            .await?;
        Ok(())
    }

    /// Serialize work on one run across tasks and nodes.
    pub async fn lock_run(
        &self,
        run_id: &str,
        ttl: Duration,
        wait: Duration,
    ) -> Result<Box<dyn LockGuard>, EngineError> {
        self.lock
            .acquire_run(run_id, ttl, wait)
            .await
            .map_err(|e| match e {
                StateError::Timeout(_) => EngineError::LockFailed(format!("run {run_id} is busy")),
                other => EngineError::LockFailed(other.to_string()),
            })
    }
}

/// Drive `work` to completion, extending `guard` to `ttl` every third of
/// `ttl` meanwhile.
pub(crate) async fn keep_alive<F: Future>(guard: &dyn LockGuard, ttl: Duration, work: F) -> F::Output {
    let period = (ttl / 3).max(MIN_HEARTBEAT);
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = heartbeat.tick() => {
                if let Err(e) = guard.extend(ttl).await {
                    warn!(error = %e, "failed to extend run lock");
                }
            }
        }
    }
}
