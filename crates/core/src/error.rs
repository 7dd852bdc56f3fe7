use thiserror::Error;

/// A workflow definition that cannot be registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowValidationError {
    #[error("workflow has no id")]
    MissingId,

    #[error("workflow {workflow}: {reason}")]
    Invalid { workflow: String, reason: String },
}

/// Errors from schedule translation and parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid time of day: {0}")]
    InvalidTime(String),

    #[error("invalid cron expression: {0}")]
    InvalidExpression(String),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("weekly schedule without days")]
    MissingDays,

    #[error("day of month {0} outside 1-31")]
    InvalidDayOfMonth(u32),
}

/// An action config that its handler cannot act on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionConfigError {
    #[error("missing required field: {0}")]
    Missing(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Attempted mutation of a run that has already reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunTransitionError {
    #[error("run {run_id} is already {status}")]
    Terminal { run_id: String, status: String },
}
