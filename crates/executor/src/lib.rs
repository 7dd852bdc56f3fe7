pub mod config;
pub mod executor;
pub mod retry;

pub use config::ExecutorConfig;
pub use executor::{ActionExecutor, HandlerFailure, HandlerOutcome, RetryPolicy};
pub use retry::RetryStrategy;
