use std::sync::Arc;

use cadence_executor::{ActionExecutor, ExecutorConfig};
use cadence_provider::{Directory, DynActionHandler, HandlerRegistry, InMemoryDirectory};
use cadence_state::{DistributedLock, StateStore};

use crate::engine::{Engine, EngineConfig};
use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::rate_limit::RateLimiter;
use crate::recipients::RecipientResolver;
use crate::registry::WorkflowRegistry;
use crate::tracker::RunTracker;

/// Fluent builder for constructing an [`Engine`].
///
/// A [`StateStore`] and a [`DistributedLock`] must be supplied. Everything
/// else defaults: an empty registry, no handlers, an empty directory and the
/// default executor config.
pub struct EngineBuilder {
    config: EngineConfig,
    state: Option<Arc<dyn StateStore>>,
    lock: Option<Arc<dyn DistributedLock>>,
    registry: Option<Arc<WorkflowRegistry>>,
    handlers: HandlerRegistry,
    directory: Option<Arc<dyn Directory>>,
    executor_config: ExecutorConfig,
    metrics: Option<Arc<EngineMetrics>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            state: None,
            lock: None,
            registry: None,
            handlers: HandlerRegistry::new(),
            directory: None,
            executor_config: ExecutorConfig::default(),
            metrics: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the state store implementation.
    #[must_use]
    pub fn state(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state = Some(store);
        self
    }

    /// Set the distributed lock implementation.
    #[must_use]
    pub fn lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Share an existing registry, e.g. one a [`WorkflowWatcher`](crate::WorkflowWatcher)
    /// also reloads.
    #[must_use]
    pub fn registry(mut self, registry: Arc<WorkflowRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register an action handler. A later handler for the same action type
    /// replaces an earlier one.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn DynActionHandler>) -> Self {
        self.handlers.register(handler);
        self
    }

    #[must_use]
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Set the directory used for recipient resolution.
    #[must_use]
    pub fn directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    #[must_use]
    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Consume the builder and produce an [`Engine`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if the state store or the
    /// distributed lock was not set.
    pub fn build(self) -> Result<Engine, EngineError> {
        let state = self
            .state
            .ok_or_else(|| EngineError::Configuration("state store is required".into()))?;

        let lock = self
            .lock
            .ok_or_else(|| EngineError::Configuration("distributed lock is required".into()))?;

        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(InMemoryDirectory::new()));
        let namespace = self.config.namespace.clone();

        Ok(Engine {
            registry: self.registry.unwrap_or_default(),
            handlers: self.handlers,
            executor: ActionExecutor::new(self.executor_config),
            resolver: RecipientResolver::new(directory),
            limiter: RateLimiter::new(Arc::clone(&state), namespace.as_str()),
            tracker: RunTracker::new(Arc::clone(&state), lock, namespace),
            state,
            metrics: self.metrics.unwrap_or_default(),
            config: self.config,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
