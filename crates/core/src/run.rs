use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{ActionType, WorkflowAction};
use crate::error::RunTransitionError;
use crate::recipient::Recipient;
use crate::workflow::Workflow;

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a run to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSource {
    Event { name: String },
    Schedule { fire_at: DateTime<Utc> },
    Webhook { token: String },
    Manual { triggered_by: String },
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event { name } => write!(f, "event:{name}"),
            Self::Schedule { .. } => f.write_str("schedule"),
            Self::Webhook { token } => write!(f, "webhook:{token}"),
            Self::Manual { triggered_by } => write!(f, "manual:{triggered_by}"),
        }
    }
}

/// Why admission control turned a run or a recipient away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    DailyLimit { limit: u32 },
    RecipientLimit { limit: u32 },
    Cooldown { minutes: u32 },
    /// Every candidate recipient was excluded, or there were none.
    NoRecipients,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DailyLimit { limit } => write!(f, "daily run limit of {limit} reached"),
            Self::RecipientLimit { limit } => {
                write!(f, "per-recipient run limit of {limit} reached")
            }
            Self::Cooldown { minutes } => write!(f, "within {minutes} minute cooldown"),
            Self::NoRecipients => f.write_str("no admissible recipients"),
        }
    }
}

/// A recipient excluded from a run by admission control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedRecipient {
    pub recipient: Recipient,
    #[serde(flatten)]
    pub reason: DenialReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionLogStatus {
    Success,
    Failed,
    Skipped,
}

/// One entry of a run's append-only action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLogEntry {
    pub action_id: String,
    pub order: u32,
    pub action_type: ActionType,
    pub status: ActionLogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

impl ActionLogEntry {
    fn base(action: &WorkflowAction, status: ActionLogStatus, at: DateTime<Utc>) -> Self {
        Self {
            action_id: action.id(),
            order: action.order,
            action_type: action.action_type(),
            status,
            result: None,
            error: None,
            error_code: None,
            attempts: 0,
            at,
        }
    }

    #[must_use]
    pub fn success(
        action: &WorkflowAction,
        result: Value,
        attempts: u32,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            result: Some(result),
            attempts,
            ..Self::base(action, ActionLogStatus::Success, at)
        }
    }

    #[must_use]
    pub fn failed(
        action: &WorkflowAction,
        code: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            error_code: Some(code.into()),
            attempts,
            ..Self::base(action, ActionLogStatus::Failed, at)
        }
    }

    /// A skipped entry; `result` says why.
    #[must_use]
    pub fn skipped(action: &WorkflowAction, result: Value, at: DateTime<Utc>) -> Self {
        Self {
            result: Some(result),
            ..Self::base(action, ActionLogStatus::Skipped, at)
        }
    }
}

/// One execution instance of a workflow.
///
/// The action list and `continue_on_error` are captured from the definition
/// at start, so later definition changes do not affect the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub workflow_version: u32,
    pub trigger_source: TriggerSource,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    /// Trigger payload plus resolved variables at start.
    pub context: Value,
    pub actions: Vec<WorkflowAction>,
    pub continue_on_error: bool,
    /// Admitted run-level recipients.
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    /// Index into `actions` of the next action to process.
    #[serde(default)]
    pub cursor: usize,
    /// Pending continuation: do not touch `actions[cursor]` before this.
    #[serde(default)]
    pub resume_at: Option<DateTime<Utc>>,
    /// Order of the action whose delay or wait has already been scheduled.
    #[serde(default)]
    pub waiting_on: Option<u32>,
    #[serde(default)]
    pub actions_executed: Vec<ActionLogEntry>,
    #[serde(default)]
    pub emails_sent: u32,
    #[serde(default)]
    pub actions_completed: u32,
    #[serde(default)]
    pub actions_failed: u32,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_details: Option<Value>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
}

impl WorkflowRun {
    /// Create a `running` run with a fresh time-ordered id.
    #[must_use]
    pub fn start(
        workflow: &Workflow,
        trigger_source: TriggerSource,
        context: Value,
        recipients: Vec<Recipient>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            workflow_version: workflow.version,
            trigger_source,
            status: RunStatus::Running,
            started_at: now,
            updated_at: now,
            completed_at: None,
            duration_ms: None,
            context,
            actions: workflow.ordered_actions(),
            continue_on_error: workflow.settings.continue_on_error,
            recipients,
            cursor: 0,
            resume_at: None,
            waiting_on: None,
            actions_executed: Vec::new(),
            emails_sent: 0,
            actions_completed: 0,
            actions_failed: 0,
            error_message: None,
            error_details: None,
            cancel_reason: None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The action at the cursor, if any remain.
    #[must_use]
    pub fn current_action(&self) -> Option<&WorkflowAction> {
        self.actions.get(self.cursor)
    }

    /// Position in `actions` of the action with the given `order`.
    #[must_use]
    pub fn position_of(&self, order: u32) -> Option<usize> {
        self.actions.iter().position(|a| a.order == order)
    }

    fn ensure_running(&self) -> Result<(), RunTransitionError> {
        if self.is_terminal() {
            return Err(RunTransitionError::Terminal {
                run_id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    /// Append an entry to the action log and bump the matching counter.
    pub fn record(&mut self, entry: ActionLogEntry) -> Result<(), RunTransitionError> {
        self.ensure_running()?;
        match entry.status {
            ActionLogStatus::Success => self.actions_completed += 1,
            ActionLogStatus::Failed => self.actions_failed += 1,
            ActionLogStatus::Skipped => {}
        }
        self.updated_at = entry.at;
        self.actions_executed.push(entry);
        Ok(())
    }

    fn finish(&mut self, status: RunStatus, now: DateTime<Utc>) -> Result<(), RunTransitionError> {
        self.ensure_running()?;
        self.status = status;
        self.completed_at = Some(now);
        self.updated_at = now;
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
        self.resume_at = None;
        self.waiting_on = None;
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), RunTransitionError> {
        self.finish(RunStatus::Completed, now)
    }

    pub fn fail(
        &mut self,
        message: impl Into<String>,
        details: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<(), RunTransitionError> {
        self.finish(RunStatus::Failed, now)?;
        self.error_message = Some(message.into());
        self.error_details = details;
        Ok(())
    }

    pub fn cancel(
        &mut self,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), RunTransitionError> {
        self.finish(RunStatus::Cancelled, now)?;
        self.cancel_reason = reason;
        Ok(())
    }

    /// The context that action conditions see: the start snapshot plus the
    /// results of successful actions under `results.<action id>`.
    #[must_use]
    pub fn evaluation_context(&self) -> Value {
        let mut view = self.context.clone();
        let results: serde_json::Map<String, Value> = self
            .actions_executed
            .iter()
            .filter(|e| e.status == ActionLogStatus::Success)
            .filter_map(|e| e.result.clone().map(|r| (e.action_id.clone(), r)))
            .collect();
        if let Value::Object(map) = &mut view {
            map.insert("results".to_owned(), Value::Object(results));
        }
        view
    }
}
