//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use cadence_core::{
    ActionKind, ActionType, RecipientConfig, RecipientSpec, SendEmailConfig, TaskConfig, Workflow,
};
use cadence_engine::{Engine, EngineBuilder, EngineConfig, WorkflowRegistry};
use cadence_executor::{ExecutorConfig, RetryStrategy};
use cadence_provider::{ActionHandler, ActionInvocation, HandlerError, InMemoryDirectory};
use cadence_state::StateStore;
use cadence_state_memory::{MemoryDistributedLock, MemoryStateStore};
use parking_lot::Mutex;
use serde_json::{Value, json};

/// Records every invocation and succeeds, or fails with a transient error
/// when built with [`RecordingHandler::failing`].
pub struct RecordingHandler {
    action_type: ActionType,
    fail: bool,
    latency: Duration,
    calls: AtomicU32,
    invocations: Mutex<Vec<ActionInvocation>>,
}

impl RecordingHandler {
    pub fn new(action_type: ActionType) -> Arc<Self> {
        Arc::new(Self {
            action_type,
            fail: false,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            invocations: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(action_type: ActionType) -> Arc<Self> {
        Arc::new(Self {
            action_type,
            fail: true,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            invocations: Mutex::new(Vec::new()),
        })
    }

    /// Succeeds after sleeping for `latency`.
    pub fn slow(action_type: ActionType, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            action_type,
            fail: false,
            latency,
            calls: AtomicU32::new(0),
            invocations: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn assert_called(&self, expected: u32) {
        assert_eq!(
            self.calls(),
            expected,
            "{} handler call count",
            self.action_type
        );
    }

    pub fn invocations(&self) -> Vec<ActionInvocation> {
        self.invocations.lock().clone()
    }

    /// Action ids in invocation order.
    pub fn action_ids(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(|i| i.action_id.clone())
            .collect()
    }
}

impl ActionHandler for RecordingHandler {
    fn action_type(&self) -> ActionType {
        self.action_type
    }

    async fn execute(&self, invocation: &ActionInvocation) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().push(invocation.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail {
            Err(HandlerError::Connection("upstream unavailable".into()))
        } else {
            Ok(json!({"delivered": invocation.recipients.count}))
        }
    }
}

pub struct Harness {
    pub engine: Engine,
    pub email: Arc<RecordingHandler>,
    pub task: Arc<RecordingHandler>,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        namespace: "test".into(),
        lock_wait: Duration::from_millis(200),
        ..EngineConfig::default()
    }
}

fn fast_executor() -> ExecutorConfig {
    ExecutorConfig {
        retry_strategy: RetryStrategy::Constant { delay_ms: 1 },
        ..ExecutorConfig::default()
    }
}

/// An engine with recording `send_email` and `create_task` handlers.
pub fn harness(workflows: Vec<Workflow>) -> Harness {
    harness_with(workflows, RecordingHandler::new(ActionType::SendEmail))
}

/// Like [`harness`], with a caller-supplied `send_email` handler.
pub fn harness_with(workflows: Vec<Workflow>, email: Arc<RecordingHandler>) -> Harness {
    harness_custom(workflows, test_config(), Arc::new(MemoryStateStore::new()), email)
}

/// Like [`harness`], resolving recipients against `directory`.
pub fn harness_with_directory(workflows: Vec<Workflow>, directory: InMemoryDirectory) -> Harness {
    build(
        workflows,
        test_config(),
        Arc::new(MemoryStateStore::new()),
        directory,
        RecordingHandler::new(ActionType::SendEmail),
    )
}

/// An engine over `state` with its own config and `send_email` handler.
pub fn harness_custom(
    workflows: Vec<Workflow>,
    config: EngineConfig,
    state: Arc<dyn StateStore>,
    email: Arc<RecordingHandler>,
) -> Harness {
    build(workflows, config, state, InMemoryDirectory::new(), email)
}

fn build(
    workflows: Vec<Workflow>,
    config: EngineConfig,
    state: Arc<dyn StateStore>,
    directory: InMemoryDirectory,
    email: Arc<RecordingHandler>,
) -> Harness {
    let registry = Arc::new(WorkflowRegistry::default());
    registry
        .replace(workflows)
        .expect("test workflows should be valid");
    let task = RecordingHandler::new(ActionType::CreateTask);

    let engine = EngineBuilder::new()
        .config(config)
        .state(state)
        .lock(Arc::new(MemoryDistributedLock::new()))
        .registry(registry)
        .directory(Arc::new(directory))
        .executor_config(fast_executor())
        .handler(Arc::clone(&email) as _)
        .handler(Arc::clone(&task) as _)
        .build()
        .expect("engine should build");

    Harness {
        engine,
        email,
        task,
    }
}

pub fn email_to(address: &str) -> ActionKind {
    ActionKind::SendEmail(SendEmailConfig {
        template_id: "tpl".into(),
        recipients: Some(RecipientConfig::new(RecipientSpec::SpecificEmail {
            email: address.into(),
        })),
        ..SendEmailConfig::default()
    })
}

/// An email to whoever the run admitted.
pub fn email_audience() -> ActionKind {
    ActionKind::SendEmail(SendEmailConfig {
        template_id: "tpl".into(),
        ..SendEmailConfig::default()
    })
}

pub fn task(title: &str) -> ActionKind {
    ActionKind::CreateTask(TaskConfig {
        title: title.into(),
        recipients: Some(RecipientConfig::new(RecipientSpec::SpecificEmail {
            email: "ops@agency.test".into(),
        })),
        ..TaskConfig::default()
    })
}
