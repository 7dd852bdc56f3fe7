use std::time::Duration;

use serde::Deserialize;

/// Configuration for the background continuation and schedule workers.
#[derive(Debug, Deserialize)]
pub struct BackgroundServerConfig {
    /// Whether background processing runs at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// How often to look for suspended runs that are due (seconds).
    #[serde(default = "default_continuation_poll_interval")]
    pub continuation_poll_interval_seconds: u64,
    /// How often to evaluate schedule triggers (seconds).
    #[serde(default = "default_schedule_tick_interval")]
    pub schedule_tick_interval_seconds: u64,
    #[serde(default = "default_enabled")]
    pub enable_continuations: bool,
    #[serde(default = "default_enabled")]
    pub enable_schedule_ticks: bool,
}

impl Default for BackgroundServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            continuation_poll_interval_seconds: default_continuation_poll_interval(),
            schedule_tick_interval_seconds: default_schedule_tick_interval(),
            enable_continuations: default_enabled(),
            enable_schedule_ticks: default_enabled(),
        }
    }
}

impl BackgroundServerConfig {
    pub fn to_background_config(&self) -> cadence_engine::BackgroundConfig {
        cadence_engine::BackgroundConfig {
            continuation_poll_interval: Duration::from_secs(
                self.continuation_poll_interval_seconds.max(1),
            ),
            schedule_tick_interval: Duration::from_secs(self.schedule_tick_interval_seconds.max(1)),
            enable_continuations: self.enable_continuations,
            enable_schedule_ticks: self.enable_schedule_ticks,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_continuation_poll_interval() -> u64 {
    5
}

fn default_schedule_tick_interval() -> u64 {
    60
}
