use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by engine operations.
///
/// Non-matches and admission denials are outcomes, not errors; they are
/// reported through [`DispatchReport`](crate::DispatchReport).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("state error: {0}")]
    State(#[from] cadence_state::StateError),

    #[error("invalid workflow: {0}")]
    Validation(#[from] cadence_core::WorkflowValidationError),

    #[error(transparent)]
    Transition(#[from] cadence_core::RunTransitionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("workflow {0} is not active")]
    WorkflowInactive(String),

    #[error("duplicate workflow id: {0}")]
    DuplicateWorkflow(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("no webhook registered for token {0}")]
    UnknownWebhook(String),

    #[error("webhook signature rejected for token {0}")]
    Unauthorized(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("lock acquisition failed: {0}")]
    LockFailed(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("directory lookup failed: {0}")]
    Directory(#[from] cadence_provider::HandlerError),
}
