use std::time::Duration;

use crate::retry::RetryStrategy;

/// Configuration for the [`ActionExecutor`](crate::ActionExecutor).
///
/// How many times a handler is retried is decided per action by its
/// [`RetryPolicy`](crate::RetryPolicy); this only shapes the backoff, the
/// per-call timeout and the global concurrency bound.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub retry_strategy: RetryStrategy,
    /// Maximum wall-clock time for a single handler call.
    pub handler_timeout: Duration,
    /// Maximum number of handler calls in flight across all runs.
    pub max_concurrent: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_strategy: RetryStrategy::default(),
            handler_timeout: Duration::from_secs(30),
            max_concurrent: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = ExecutorConfig::default();
        assert_eq!(cfg.handler_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_concurrent, 32);
        assert!(matches!(cfg.retry_strategy, RetryStrategy::Exponential { .. }));
    }
}
