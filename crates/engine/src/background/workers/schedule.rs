use chrono::Utc;
use tracing::warn;

use super::super::{BackgroundProcessor, ScheduleTickEvent};

impl BackgroundProcessor {
    pub(crate) async fn emit_schedule_tick(
        &self,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(ref tx) = self.schedule_tick_tx else {
            return Ok(());
        };

        if tx.send(ScheduleTickEvent { at: Utc::now() }).await.is_err() {
            warn!("schedule tick channel closed");
        }
        Ok(())
    }
}
