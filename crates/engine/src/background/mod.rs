//! Background processor for periodic tasks.
//!
//! The background processor handles:
//! - Detecting suspended runs whose continuation is due
//! - Emitting schedule ticks so time-triggered workflows fire

mod workers;

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info};

use crate::tracker::RunTracker;

/// Configuration for the background processor.
#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    /// How often to look for due continuations (default: 5 seconds).
    pub continuation_poll_interval: Duration,
    /// How often to emit a schedule tick (default: 60 seconds). Should match
    /// the engine's schedule window.
    pub schedule_tick_interval: Duration,
    /// Whether continuation polling is enabled.
    pub enable_continuations: bool,
    /// Whether schedule ticks are enabled.
    pub enable_schedule_ticks: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            continuation_poll_interval: Duration::from_secs(5),
            schedule_tick_interval: Duration::from_secs(60),
            enable_continuations: true,
            enable_schedule_ticks: true,
        }
    }
}

/// A suspended run is ready to resume.
#[derive(Debug, Clone)]
pub struct ContinuationDueEvent {
    pub run_id: String,
    pub detected_at: DateTime<Utc>,
}

/// A schedule tick to dispatch via [`Engine::tick`](crate::Engine::tick).
#[derive(Debug, Clone, Copy)]
pub struct ScheduleTickEvent {
    pub at: DateTime<Utc>,
}

/// Background processor that detects due work and hands it to consumers
/// over channels.
///
/// The processor only detects. Consumers call
/// [`Engine::advance_run`](crate::Engine::advance_run) or
/// [`Engine::tick`](crate::Engine::tick), which take the run lock and
/// schedule claims, so duplicate events are harmless.
pub struct BackgroundProcessor {
    config: BackgroundConfig,
    tracker: RunTracker,
    shutdown_rx: mpsc::Receiver<()>,
    continuation_tx: Option<mpsc::Sender<ContinuationDueEvent>>,
    schedule_tick_tx: Option<mpsc::Sender<ScheduleTickEvent>>,
}

impl BackgroundProcessor {
    /// Run until a shutdown signal arrives.
    pub async fn run(&mut self) {
        info!("background processor starting");

        let mut continuation_interval = interval(self.config.continuation_poll_interval);
        let mut tick_interval = interval(self.config.schedule_tick_interval);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("background processor received shutdown signal");
                    break;
                }
                _ = continuation_interval.tick(), if self.config.enable_continuations => {
                    if let Err(e) = self.detect_due_continuations().await {
                        error!(error = %e, "error detecting due continuations");
                    }
                }
                _ = tick_interval.tick(), if self.config.enable_schedule_ticks => {
                    if let Err(e) = self.emit_schedule_tick().await {
                        error!(error = %e, "error emitting schedule tick");
                    }
                }
            }
        }

        info!("background processor stopped");
    }
}

/// Builder for creating a background processor.
#[derive(Default)]
pub struct BackgroundProcessorBuilder {
    config: BackgroundConfig,
    tracker: Option<RunTracker>,
    continuation_tx: Option<mpsc::Sender<ContinuationDueEvent>>,
    schedule_tick_tx: Option<mpsc::Sender<ScheduleTickEvent>>,
}

impl BackgroundProcessorBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: BackgroundConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the run tracker used to find due continuations.
    #[must_use]
    pub fn tracker(mut self, tracker: RunTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Set the continuation event channel.
    #[must_use]
    pub fn continuation_channel(mut self, tx: mpsc::Sender<ContinuationDueEvent>) -> Self {
        self.continuation_tx = Some(tx);
        self
    }

    /// Set the schedule tick channel.
    #[must_use]
    pub fn schedule_tick_channel(mut self, tx: mpsc::Sender<ScheduleTickEvent>) -> Self {
        self.schedule_tick_tx = Some(tx);
        self
    }

    /// Build the processor and the sender that shuts it down.
    ///
    /// # Errors
    ///
    /// Returns an error if no run tracker was set.
    pub fn build(self) -> Result<(BackgroundProcessor, mpsc::Sender<()>), &'static str> {
        let tracker = self.tracker.ok_or("run tracker is required")?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let processor = BackgroundProcessor {
            config: self.config,
            tracker,
            shutdown_rx,
            continuation_tx: self.continuation_tx,
            schedule_tick_tx: self.schedule_tick_tx,
        };
        Ok((processor, shutdown_tx))
    }
}
