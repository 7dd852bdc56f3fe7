use cadence_core::ActionType;
use serde_json::{Value, json};
use tracing::info;

use crate::error::HandlerError;
use crate::handler::{ActionHandler, ActionInvocation};

/// A handler that logs the invocation and reports success without calling
/// any collaborator.
///
/// Registered for action types that have no real backend in a deployment
/// (local development, dry environments).
pub struct LogHandler {
    action_type: ActionType,
}

impl LogHandler {
    pub fn new(action_type: ActionType) -> Self {
        Self { action_type }
    }
}

impl ActionHandler for LogHandler {
    fn action_type(&self) -> ActionType {
        self.action_type
    }

    async fn execute(&self, invocation: &ActionInvocation) -> Result<Value, HandlerError> {
        invocation.kind.validate()?;
        info!(
            run.id = %invocation.run_id,
            workflow.id = %invocation.workflow_id,
            action.id = %invocation.action_id,
            action_type = %self.action_type,
            recipients = invocation.recipients.count,
            "log handler executed action"
        );
        Ok(json!({
            "handler": "log",
            "logged": true,
            "recipients": invocation.recipients.count,
        }))
    }
}
