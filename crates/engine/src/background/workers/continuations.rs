use chrono::Utc;
use tracing::{debug, warn};

use super::super::{BackgroundProcessor, ContinuationDueEvent};

impl BackgroundProcessor {
    /// Scan the continuation index and emit an event per due run.
    pub(crate) async fn detect_due_continuations(
        &self,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(ref tx) = self.continuation_tx else {
            return Ok(());
        };

        let now = Utc::now();
        let due = self.tracker.due_runs(now).await?;
        if due.is_empty() {
            return Ok(());
        }

        debug!(count = due.len(), "continuations due");

        for run_id in due {
            let event = ContinuationDueEvent {
                run_id,
                detected_at: now,
            };
            if tx.send(event).await.is_err() {
                warn!("continuation event channel closed");
                return Ok(());
            }
        }

        Ok(())
    }
}
