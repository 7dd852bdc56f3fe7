use std::time::Duration;

use serde::Deserialize;

/// Engine tunables.
#[derive(Debug, Deserialize)]
pub struct EngineServerConfig {
    /// Prefix of every state key the engine writes.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Window a schedule tick covers, in seconds. Keep it equal to
    /// `background.schedule_tick_interval_seconds`.
    #[serde(default = "default_schedule_window")]
    pub schedule_window_seconds: u64,
    /// TTL of the per-run lock in seconds.
    #[serde(default = "default_run_lock_ttl")]
    pub run_lock_ttl_seconds: u64,
    /// How long to wait for a busy run lock, in milliseconds.
    #[serde(default = "default_lock_wait")]
    pub lock_wait_ms: u64,
}

impl Default for EngineServerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            schedule_window_seconds: default_schedule_window(),
            run_lock_ttl_seconds: default_run_lock_ttl(),
            lock_wait_ms: default_lock_wait(),
        }
    }
}

impl EngineServerConfig {
    pub fn to_engine_config(&self) -> cadence_engine::EngineConfig {
        cadence_engine::EngineConfig {
            namespace: self.namespace.clone(),
            schedule_window: Duration::from_secs(self.schedule_window_seconds),
            run_lock_ttl: Duration::from_secs(self.run_lock_ttl_seconds),
            lock_wait: Duration::from_millis(self.lock_wait_ms),
        }
    }
}

fn default_namespace() -> String {
    "cadence".to_owned()
}

fn default_schedule_window() -> u64 {
    60
}

fn default_run_lock_ttl() -> u64 {
    60
}

fn default_lock_wait() -> u64 {
    5000
}
