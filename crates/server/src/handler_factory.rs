use std::sync::Arc;
use std::time::Duration;

use cadence_provider::{HandlerRegistry, HttpWebhookHandler, InMemoryDirectory, LogHandler};
use tracing::{info, warn};

use crate::config::{DirectoryConfig, HandlersConfig};
use crate::error::ServerError;

/// Build the handler registry described by `[handlers]`.
pub fn create_handlers(config: &HandlersConfig) -> Result<HandlerRegistry, ServerError> {
    let mut handlers = HandlerRegistry::new();

    for action_type in &config.log {
        if action_type.is_control_flow() {
            warn!(action.kind = %action_type, "control-flow actions need no handler, ignoring");
            continue;
        }
        handlers.register(Arc::new(LogHandler::new(*action_type)));
    }

    if config.webhook {
        let mut webhook =
            HttpWebhookHandler::new(Duration::from_secs(config.webhook_timeout_seconds))
                .map_err(|e| ServerError::Config(format!("webhook handler: {e}")))?;
        if let Some(secret) = &config.webhook_signing_secret {
            webhook = webhook.with_signing_secret(secret);
        }
        handlers.register(Arc::new(webhook));
    }

    info!(count = handlers.len(), "action handlers registered");
    Ok(handlers)
}

/// Load the in-memory directory from `[directory] seed_path`, or start empty.
pub fn create_directory(config: &DirectoryConfig) -> Result<InMemoryDirectory, ServerError> {
    let Some(path) = &config.seed_path else {
        return Ok(InMemoryDirectory::new());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ServerError::Config(format!("failed to read directory seed {path}: {e}")))?;
    let directory = InMemoryDirectory::from_json(&raw)
        .map_err(|e| ServerError::Config(format!("invalid directory seed {path}: {e}")))?;
    info!(path = %path, "directory seed loaded");
    Ok(directory)
}
