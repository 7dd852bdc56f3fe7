use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking engine activity.
///
/// Counters use relaxed ordering. For a point-in-time view, call
/// [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Stimuli received (events, ticks, webhooks, manual requests).
    pub stimuli_received: AtomicU64,
    /// Workflows whose trigger and conditions matched a stimulus.
    pub workflows_matched: AtomicU64,
    /// Matched workflows whose conditions did not hold.
    pub conditions_not_met: AtomicU64,
    /// Runs created.
    pub runs_started: AtomicU64,
    /// Runs that reached `completed`.
    pub runs_completed: AtomicU64,
    /// Runs that reached `failed`.
    pub runs_failed: AtomicU64,
    /// Runs that reached `cancelled`.
    pub runs_cancelled: AtomicU64,
    /// Runs or recipients turned away by admission control.
    pub admissions_denied: AtomicU64,
    /// Action log entries with status `success`.
    pub actions_succeeded: AtomicU64,
    /// Action log entries with status `failed`.
    pub actions_failed: AtomicU64,
    /// Action log entries with status `skipped`.
    pub actions_skipped: AtomicU64,
    /// Runs suspended until a later time.
    pub continuations_scheduled: AtomicU64,
}

impl EngineMetrics {
    pub fn increment_stimuli_received(&self) {
        self.stimuli_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_workflows_matched(&self) {
        self.workflows_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_conditions_not_met(&self) {
        self.conditions_not_met.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_runs_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_runs_cancelled(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_admissions_denied(&self) {
        self.admissions_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_actions_succeeded(&self) {
        self.actions_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_actions_failed(&self) {
        self.actions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_actions_skipped(&self) {
        self.actions_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_continuations_scheduled(&self) {
        self.continuations_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            stimuli_received: self.stimuli_received.load(Ordering::Relaxed),
            workflows_matched: self.workflows_matched.load(Ordering::Relaxed),
            conditions_not_met: self.conditions_not_met.load(Ordering::Relaxed),
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_cancelled: self.runs_cancelled.load(Ordering::Relaxed),
            admissions_denied: self.admissions_denied.load(Ordering::Relaxed),
            actions_succeeded: self.actions_succeeded.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
            actions_skipped: self.actions_skipped.load(Ordering::Relaxed),
            continuations_scheduled: self.continuations_scheduled.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`EngineMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub stimuli_received: u64,
    pub workflows_matched: u64,
    pub conditions_not_met: u64,
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub runs_cancelled: u64,
    pub admissions_denied: u64,
    pub actions_succeeded: u64,
    pub actions_failed: u64,
    pub actions_skipped: u64,
    pub continuations_scheduled: u64,
}
