use std::sync::Arc;

use cadence_state::{DistributedLock, StateStore};
use cadence_state_memory::{MemoryDistributedLock, MemoryStateStore};

use crate::config::StateConfig;
use crate::error::ServerError;

/// A state store and distributed lock pair.
pub type StatePair = (Arc<dyn StateStore>, Arc<dyn DistributedLock>);

/// Construct a `StateStore` and `DistributedLock` pair from configuration.
pub fn create_state(config: &StateConfig) -> Result<StatePair, ServerError> {
    match config.backend.as_str() {
        "memory" => Ok(create_memory()),
        other => Err(ServerError::Config(format!(
            "unsupported state backend: {other}"
        ))),
    }
}

fn create_memory() -> StatePair {
    (
        Arc::new(MemoryStateStore::new()),
        Arc::new(MemoryDistributedLock::new()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_is_created() {
        assert!(create_state(&StateConfig::default()).is_ok());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let config = StateConfig {
            backend: "redis".into(),
        };
        let err = create_state(&config).err().unwrap();
        assert!(err.to_string().contains("unsupported state backend: redis"));
    }
}
