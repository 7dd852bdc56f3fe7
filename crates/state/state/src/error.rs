use thiserror::Error;

/// Errors from state store and distributed lock operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("lock expired: {0}")]
    LockExpired(String),

    /// A counter key holds something that is not an integer.
    #[error("counter {key} holds a non-integer value: {value}")]
    InvalidCounter { key: String, value: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}
