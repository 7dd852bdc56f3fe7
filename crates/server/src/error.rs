use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cadence_engine::EngineError;
use thiserror::Error;

/// Errors that can occur when running the Cadence server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An engine-level error surfaced through the API.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The request body could not be understood.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Engine(e) => match e {
                EngineError::WorkflowNotFound(_)
                | EngineError::RunNotFound(_)
                | EngineError::UnknownWebhook(_) => StatusCode::NOT_FOUND,
                EngineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                EngineError::WorkflowInactive(_)
                | EngineError::InvalidPayload(_)
                | EngineError::Validation(_)
                | EngineError::DuplicateWorkflow(_)
                | EngineError::Load { .. } => StatusCode::BAD_REQUEST,
                EngineError::LockFailed(_) => StatusCode::CONFLICT,
                EngineError::State(_)
                | EngineError::Transition(_)
                | EngineError::Serialization(_)
                | EngineError::Configuration(_)
                | EngineError::Directory(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
