pub mod action;
pub mod catalog;
pub mod condition;
pub mod error;
pub mod recipient;
pub mod run;
pub mod schedule;
pub mod signature;
pub mod trigger;
pub mod workflow;

pub use action::{
    ActionKind, ActionType, AiDecisionConfig, AssignUserConfig, BranchConfig, ElseBranch,
    HttpMethod, NotificationConfig, SendEmailConfig, TaskConfig, TaskPriority, UpdateFieldConfig,
    WaitConfig, WebhookConfig, WorkflowAction,
};
pub use catalog::{CatalogIssue, ENGINE_CONTEXT_KEYS, EventCatalog, TriggerEventType};
pub use condition::{Combinator, Condition, ConditionOperator, evaluate, resolve_path};
pub use error::{ActionConfigError, RunTransitionError, ScheduleError, WorkflowValidationError};
pub use recipient::{
    DEFAULT_MAX_RECIPIENTS, Recipient, RecipientConfig, RecipientSpec, ResolvedRecipients,
};
pub use run::{
    ActionLogEntry, ActionLogStatus, DenialReason, DroppedRecipient, RunStatus, TriggerSource,
    WorkflowRun,
};
pub use schedule::{CompiledSchedule, ScheduleDay, ScheduleFrequency, ScheduleRecords, ScheduleSpec};
pub use trigger::Trigger;
pub use workflow::{Workflow, WorkflowSettings, WorkflowStatus};
