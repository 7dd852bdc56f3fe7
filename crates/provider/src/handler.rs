use async_trait::async_trait;
use cadence_core::{ActionKind, ActionType, ResolvedRecipients};
use serde::Serialize;
use serde_json::Value;

use crate::error::HandlerError;

/// Everything a handler needs to perform one action of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInvocation {
    pub run_id: String,
    pub workflow_id: String,
    pub action_id: String,
    pub kind: ActionKind,
    pub recipients: ResolvedRecipients,
    /// The run's evaluation context at the time the action is reached.
    pub context: Value,
}

impl ActionInvocation {
    pub fn action_type(&self) -> ActionType {
        self.kind.action_type()
    }
}

/// Strongly-typed action handler with native `async fn`.
///
/// Each handler wraps exactly one external collaborator (mail, notification,
/// task service, ...) and is a function of the invocation alone. This trait is
/// not object-safe; use [`DynActionHandler`] for dynamic dispatch. Every
/// `ActionHandler` implements `DynActionHandler` via a blanket implementation.
pub trait ActionHandler: Send + Sync {
    /// The action type this handler performs.
    fn action_type(&self) -> ActionType;

    /// Perform the action and return an opaque result for the run log.
    fn execute(
        &self,
        invocation: &ActionInvocation,
    ) -> impl std::future::Future<Output = Result<Value, HandlerError>> + Send;
}

/// Object-safe handler trait for use behind `Arc<dyn DynActionHandler>`.
#[async_trait]
pub trait DynActionHandler: Send + Sync {
    fn action_type(&self) -> ActionType;

    async fn execute(&self, invocation: &ActionInvocation) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<T: ActionHandler> DynActionHandler for T {
    fn action_type(&self) -> ActionType {
        ActionHandler::action_type(self)
    }

    async fn execute(&self, invocation: &ActionInvocation) -> Result<Value, HandlerError> {
        ActionHandler::execute(self, invocation).await
    }
}
