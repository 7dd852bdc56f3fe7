use std::time::Duration;

use cadence_executor::RetryStrategy;
use serde::Deserialize;

/// Configuration for the action executor.
#[derive(Debug, Deserialize)]
pub struct ExecutorServerConfig {
    /// Per-call handler timeout in seconds.
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_seconds: u64,
    /// Maximum number of handler calls in flight.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Backoff between retried attempts, e.g.
    /// `{ strategy = "linear", delay_ms = 500, max_ms = 5000 }`.
    #[serde(default)]
    pub retry: RetryStrategy,
}

impl Default for ExecutorServerConfig {
    fn default() -> Self {
        Self {
            handler_timeout_seconds: default_handler_timeout(),
            max_concurrent: default_max_concurrent(),
            retry: RetryStrategy::default(),
        }
    }
}

impl ExecutorServerConfig {
    pub fn to_executor_config(&self) -> cadence_executor::ExecutorConfig {
        cadence_executor::ExecutorConfig {
            retry_strategy: self.retry.clone(),
            handler_timeout: Duration::from_secs(self.handler_timeout_seconds),
            max_concurrent: self.max_concurrent.max(1),
        }
    }
}

fn default_handler_timeout() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    32
}
