use chrono::{DateTime, Utc};
use serde::Serialize;

use cadence_core::{
    ActionType, DenialReason, DroppedRecipient, ResolvedRecipients, RunStatus, WorkflowRun,
};

/// Outcome of dispatching one stimulus.
///
/// Every matched workflow lands in exactly one of `started`, `denied`,
/// `not_met` or `errors`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    /// Workflows whose trigger matched.
    pub matched: usize,
    pub started: Vec<RunSummary>,
    pub denied: Vec<DeniedWorkflow>,
    /// Workflows whose workflow-level conditions did not hold.
    pub not_met: Vec<String>,
    pub errors: Vec<DispatchFailure>,
}

impl DispatchReport {
    /// Fold the outcome of a further dispatch into this one.
    pub fn merge(&mut self, other: DispatchReport) {
        self.matched += other.matched;
        self.started.extend(other.started);
        self.denied.extend(other.denied);
        self.not_met.extend(other.not_met);
        self.errors.extend(other.errors);
    }

    /// Ids of the runs this dispatch created.
    pub fn run_ids(&self) -> Vec<&str> {
        self.started.iter().map(|s| s.run_id.as_str()).collect()
    }
}

/// Where a run stands after dispatch or advancement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub recipients: usize,
    pub dropped_recipients: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn of(run: &WorkflowRun, dropped_recipients: usize) -> Self {
        Self {
            run_id: run.id.clone(),
            workflow_id: run.workflow_id.clone(),
            status: run.status,
            recipients: run.recipients.len(),
            dropped_recipients,
            resume_at: run.resume_at,
        }
    }
}

/// A matched workflow that admission control turned away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeniedWorkflow {
    pub workflow_id: String,
    #[serde(flatten)]
    pub reason: DenialReason,
    pub dropped: Vec<DroppedRecipient>,
}

/// A matched workflow that could not be started.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchFailure {
    pub workflow_id: String,
    pub error: String,
}

/// Dry run of a workflow against a payload: nothing is persisted, no
/// counters move and no handler is called.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPreview {
    pub workflow_id: String,
    pub conditions_met: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<ResolvedRecipients>,
    pub runs_today: u32,
    pub max_runs_per_day: u32,
    pub actions: Vec<ActionPreview>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPreview {
    pub action_id: String,
    pub order: u32,
    pub action_type: ActionType,
    pub delay_minutes: u32,
    pub conditions_met: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipients: Option<ResolvedRecipients>,
    pub handler_registered: bool,
}
