use cadence_core::ActionType;
use serde::Deserialize;

/// Which action handlers the server registers.
///
/// Action types listed under `log` are acknowledged and logged without
/// leaving the process; `webhook` actions call out over HTTP when
/// `webhook` is enabled. An action type with no handler fails its runs
/// with `NOT_FOUND`.
#[derive(Debug, Deserialize)]
pub struct HandlersConfig {
    #[serde(default = "default_log_handlers")]
    pub log: Vec<ActionType>,
    /// Register the HTTP webhook handler.
    #[serde(default = "default_webhook_enabled")]
    pub webhook: bool,
    /// Timeout of outbound webhook calls in seconds.
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_seconds: u64,
    /// Sign outbound webhook bodies with this secret.
    pub webhook_signing_secret: Option<String>,
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            log: default_log_handlers(),
            webhook: default_webhook_enabled(),
            webhook_timeout_seconds: default_webhook_timeout(),
            webhook_signing_secret: None,
        }
    }
}

fn default_log_handlers() -> Vec<ActionType> {
    vec![
        ActionType::SendEmail,
        ActionType::CreateNotification,
        ActionType::UpdateField,
        ActionType::CreateTask,
        ActionType::AssignUser,
        ActionType::AiDecision,
    ]
}

fn default_webhook_enabled() -> bool {
    true
}

fn default_webhook_timeout() -> u64 {
    10
}
