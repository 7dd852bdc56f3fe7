use std::time::Duration;

use cadence_core::ActionConfigError;
use thiserror::Error;

/// Errors an action handler or directory lookup can report.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No handler is registered for the action type.
    #[error("handler not found: {0}")]
    NotFound(String),

    /// The collaborator explicitly refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The collaborator did not respond within the allowed duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A network or transport-level error occurred.
    #[error("connection error: {0}")]
    Connection(String),

    /// The action config cannot be acted on.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("rate limited")]
    RateLimited,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl HandlerError {
    /// Returns `true` if the failure is transient and the call may succeed on
    /// retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::RateLimited
        )
    }

    /// Stable code written into the run's action log.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Rejected(_) => "REJECTED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Connection(_) => "CONNECTION",
            Self::Configuration(_) => "CONFIGURATION",
            Self::RateLimited => "RATE_LIMITED",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }
}

impl From<ActionConfigError> for HandlerError {
    fn from(err: ActionConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
