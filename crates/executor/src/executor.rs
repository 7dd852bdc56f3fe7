use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use cadence_core::WorkflowAction;
use cadence_provider::{ActionInvocation, DynActionHandler, HandlerError};

use crate::config::ExecutorConfig;

/// How often a single action may be retried, taken from the action itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_on_failure: bool,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn for_action(action: &WorkflowAction) -> Self {
        Self {
            retry_on_failure: action.retry_on_failure,
            max_retries: action.max_retries,
        }
    }

    pub fn no_retries() -> Self {
        Self {
            retry_on_failure: false,
            max_retries: 0,
        }
    }

    /// Retries allowed after the first attempt.
    pub fn retries(self) -> u32 {
        if self.retry_on_failure {
            self.max_retries
        } else {
            0
        }
    }
}

/// Final failure of a handler call after the retry budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerFailure {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub attempts: u32,
}

impl HandlerFailure {
    pub fn from_error(err: &HandlerError, attempts: u32) -> Self {
        Self {
            code: err.code().to_owned(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Succeeded { result: Value, attempts: u32 },
    Failed(HandlerFailure),
}

impl HandlerOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. } => *attempts,
            Self::Failed(failure) => failure.attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Invokes action handlers with bounded concurrency, a per-call timeout and
/// retry with backoff for transient failures.
///
/// A semaphore permit is held for the whole retry loop so that at most
/// [`ExecutorConfig::max_concurrent`] handler calls are in flight. Permanent
/// failures (bad config, explicit rejection) are never retried, whatever the
/// action's [`RetryPolicy`] says.
#[derive(Debug)]
pub struct ActionExecutor {
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
}

impl ActionExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self { config, semaphore }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    #[instrument(
        skip(self, invocation, handler),
        fields(run.id = %invocation.run_id, action.id = %invocation.action_id, attempt)
    )]
    pub async fn execute(
        &self,
        invocation: &ActionInvocation,
        handler: &dyn DynActionHandler,
        policy: RetryPolicy,
    ) -> HandlerOutcome {
        if let Err(err) = invocation.kind.validate() {
            let err = HandlerError::from(err);
            warn!(error = %err, "action config rejected before dispatch");
            return HandlerOutcome::Failed(HandlerFailure::from_error(&err, 0));
        }

        let Ok(_permit) = self.semaphore.acquire().await else {
            let err = HandlerError::Connection("executor is shut down".into());
            return HandlerOutcome::Failed(HandlerFailure::from_error(&err, 0));
        };

        let retries = policy.retries();
        let mut attempt: u32 = 0;
        loop {
            tracing::Span::current().record("attempt", attempt);
            debug!(attempt, retries, "invoking handler");

            let err = match tokio::time::timeout(
                self.config.handler_timeout,
                handler.execute(invocation),
            )
            .await
            {
                Ok(Ok(result)) => {
                    debug!(attempt, "handler succeeded");
                    return HandlerOutcome::Succeeded {
                        result,
                        attempts: attempt + 1,
                    };
                }
                Ok(Err(err)) => err,
                Err(_elapsed) => HandlerError::Timeout(self.config.handler_timeout),
            };

            if !err.is_retryable() || attempt >= retries {
                warn!(
                    attempt,
                    error = %err,
                    retryable = err.is_retryable(),
                    "handler failed"
                );
                return HandlerOutcome::Failed(HandlerFailure::from_error(&err, attempt + 1));
            }

            let delay = self.config.retry_strategy.delay_for(attempt);
            warn!(
                attempt,
                error = %err,
                delay_ms = %delay.as_millis(),
                "transient handler failure, will retry"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
