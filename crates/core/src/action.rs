use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Condition;
use crate::error::ActionConfigError;
use crate::recipient::RecipientConfig;

/// One step of a workflow.
///
/// Serialised as `{"order": 1, "type": "send_email", "config": {...}, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowAction {
    /// Unique within a workflow; defines execution sequence.
    pub order: u32,
    #[serde(flatten)]
    pub kind: ActionKind,
    /// Minutes after the run started before this action may execute.
    #[serde(default)]
    pub delay_minutes: u32,
    /// Per-action gate, evaluated when the action is reached.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default = "default_retry_on_failure")]
    pub retry_on_failure: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_retry_on_failure() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

impl WorkflowAction {
    /// A new action with no delay, no conditions and the default retry policy.
    #[must_use]
    pub fn new(order: u32, kind: ActionKind) -> Self {
        Self {
            order,
            kind,
            delay_minutes: 0,
            conditions: Vec::new(),
            retry_on_failure: default_retry_on_failure(),
            max_retries: default_max_retries(),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, minutes: u32) -> Self {
        self.delay_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retry_on_failure: bool, max_retries: u32) -> Self {
        self.retry_on_failure = retry_on_failure;
        self.max_retries = max_retries;
        self
    }

    /// Identifier used in the run log, derived from `order`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("action-{}", self.order)
    }

    #[must_use]
    pub fn action_type(&self) -> ActionType {
        self.kind.action_type()
    }
}

/// Discriminant of [`ActionKind`], used to key handler registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendEmail,
    CreateNotification,
    UpdateField,
    CreateTask,
    Webhook,
    Wait,
    Branch,
    AssignUser,
    AiDecision,
}

impl ActionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::CreateNotification => "create_notification",
            Self::UpdateField => "update_field",
            Self::CreateTask => "create_task",
            Self::Webhook => "webhook",
            Self::Wait => "wait",
            Self::Branch => "branch",
            Self::AssignUser => "assign_user",
            Self::AiDecision => "ai_decision",
        }
    }

    /// Whether the engine itself interprets this action instead of handing it
    /// to an external collaborator.
    #[must_use]
    pub fn is_control_flow(self) -> bool {
        matches!(self, Self::Wait | Self::Branch)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed per-action configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum ActionKind {
    SendEmail(SendEmailConfig),
    CreateNotification(NotificationConfig),
    UpdateField(UpdateFieldConfig),
    CreateTask(TaskConfig),
    Webhook(WebhookConfig),
    Wait(WaitConfig),
    Branch(BranchConfig),
    AssignUser(AssignUserConfig),
    AiDecision(AiDecisionConfig),
}

impl ActionKind {
    #[must_use]
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::SendEmail(_) => ActionType::SendEmail,
            Self::CreateNotification(_) => ActionType::CreateNotification,
            Self::UpdateField(_) => ActionType::UpdateField,
            Self::CreateTask(_) => ActionType::CreateTask,
            Self::Webhook(_) => ActionType::Webhook,
            Self::Wait(_) => ActionType::Wait,
            Self::Branch(_) => ActionType::Branch,
            Self::AssignUser(_) => ActionType::AssignUser,
            Self::AiDecision(_) => ActionType::AiDecision,
        }
    }

    /// The action's own recipient override, if it has one.
    #[must_use]
    pub fn recipients(&self) -> Option<&RecipientConfig> {
        match self {
            Self::SendEmail(c) => c.recipients.as_ref(),
            Self::CreateNotification(c) => c.recipients.as_ref(),
            Self::CreateTask(c) => c.recipients.as_ref(),
            _ => None,
        }
    }

    /// Whether the handler addresses people and therefore needs a resolved,
    /// non-empty recipient set.
    #[must_use]
    pub fn needs_recipients(&self) -> bool {
        matches!(
            self,
            Self::SendEmail(_) | Self::CreateNotification(_) | Self::CreateTask(_)
        )
    }

    /// Check that every field the handler requires is present.
    pub fn validate(&self) -> Result<(), ActionConfigError> {
        match self {
            Self::SendEmail(c) => require("templateId", &c.template_id),
            Self::CreateNotification(c) => {
                require("title", &c.title)?;
                require("message", &c.message)
            }
            Self::UpdateField(c) => require("fieldName", &c.field_name),
            Self::CreateTask(c) => require("title", &c.title),
            Self::Webhook(c) => {
                require("url", &c.url)?;
                if c.url.starts_with("http://") || c.url.starts_with("https://") {
                    Ok(())
                } else {
                    Err(ActionConfigError::Invalid {
                        field: "url",
                        reason: format!("unsupported scheme in {}", c.url),
                    })
                }
            }
            Self::Wait(_) => Ok(()),
            Self::Branch(c) => {
                if c.branch_conditions.is_empty() {
                    Err(ActionConfigError::Missing("branchConditions"))
                } else {
                    Ok(())
                }
            }
            Self::AssignUser(c) => require("entityType", &c.entity_type),
            Self::AiDecision(c) => {
                require("prompt", &c.prompt)?;
                if c.options.is_empty() {
                    Err(ActionConfigError::Missing("options"))
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ActionConfigError> {
    if value.trim().is_empty() {
        Err(ActionConfigError::Missing(field))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailConfig {
    #[serde(default)]
    pub template_id: String,
    #[serde(default)]
    pub recipients: Option<RecipientConfig>,
    /// Extra template variables merged over the run context.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub recipients: Option<RecipientConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFieldConfig {
    /// Target table. Falls back to the context's `targetTable`.
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub field_name: String,
    #[serde(default)]
    pub field_value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_days: Option<u32>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub recipients: Option<RecipientConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body. When absent, non-GET requests send the run context.
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConfig {
    #[serde(default)]
    pub wait_minutes: u32,
}

/// Where a branch goes when its conditions do not hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElseBranch {
    /// Skip every remaining action and finish the run.
    #[default]
    Skip,
    /// Carry on with the next action as if the branch held.
    Continue,
    /// Resume at the action with this `order`, skipping those in between.
    Jump(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchConfig {
    #[serde(default)]
    pub branch_conditions: Vec<Condition>,
    #[serde(default)]
    pub else_branch: ElseBranch,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignUserConfig {
    /// Assignee. Falls back to the run's subject user.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiDecisionConfig {
    #[serde(default)]
    pub prompt: String,
    /// Context paths handed to the decision service.
    #[serde(default)]
    pub context_keys: Vec<String>,
    /// Allowed answers.
    #[serde(default)]
    pub options: Vec<String>,
}
