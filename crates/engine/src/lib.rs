mod advance;
pub mod background;
pub mod builder;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod recipients;
pub mod registry;
pub mod report;
pub mod tracker;
pub mod watcher;

pub use background::{
    BackgroundConfig, BackgroundProcessor, BackgroundProcessorBuilder, ContinuationDueEvent,
    ScheduleTickEvent,
};
pub use builder::EngineBuilder;
pub use dispatcher::{Candidate, Stimulus, match_workflows};
pub use engine::{Engine, EngineConfig};
pub use error::EngineError;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use rate_limit::{Admission, RateLimiter};
pub use recipients::RecipientResolver;
pub use registry::{RegistrySnapshot, WorkflowRegistry};
pub use report::{
    ActionPreview, DeniedWorkflow, DispatchFailure, DispatchReport, RunPreview, RunSummary,
};
pub use tracker::RunTracker;
pub use watcher::WorkflowWatcher;
