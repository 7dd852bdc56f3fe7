mod background;
mod engine;
mod executor;
mod handlers;
mod server;
mod state;
mod workflows;

#[cfg(test)]
mod tests;

pub use background::*;
pub use engine::*;
pub use executor::*;
pub use handlers::*;
pub use server::*;
pub use state::*;
pub use workflows::*;

use std::path::Path;

use serde::Deserialize;

use crate::error::ServerError;

/// Top-level configuration for the Cadence server, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct CadenceConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Workflow definition loading.
    #[serde(default)]
    pub workflows: WorkflowsConfig,
    /// Directory seed for recipient resolution.
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub engine: EngineServerConfig,
    #[serde(default)]
    pub executor: ExecutorServerConfig,
    /// Registered action handlers.
    #[serde(default)]
    pub handlers: HandlersConfig,
    /// Background processing configuration.
    #[serde(default)]
    pub background: BackgroundServerConfig,
}

impl CadenceConfig {
    /// Read the configuration at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let contents = if path.exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ServerError> {
        toml::from_str(contents).map_err(|e| ServerError::Config(e.to_string()))
    }
}
