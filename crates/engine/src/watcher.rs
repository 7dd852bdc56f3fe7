use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::registry::WorkflowRegistry;

/// Default debounce interval for filesystem change events.
const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches the workflow definition directory and reloads the registry when
/// files change.
///
/// Rapid bursts of events (editor save cycles, `git checkout`) collapse into
/// one reload once the directory settles. A failed reload keeps the previous
/// definitions.
pub struct WorkflowWatcher {
    registry: Arc<WorkflowRegistry>,
    dir: PathBuf,
    debounce: Duration,
}

impl WorkflowWatcher {
    /// Watch `dir`, reloading `registry` from it on change.
    pub fn new(registry: Arc<WorkflowRegistry>, dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            dir: dir.into(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Spawn the watcher as a background tokio task. Abort the handle to
    /// stop watching.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                error!(error = %e, "workflow watcher exited with error");
            }
        })
    }

    async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);

        let _watcher = {
            let tx = tx.clone();
            let mut watcher = RecommendedWatcher::new(
                move |res: Result<notify::Event, notify::Error>| match res {
                    Ok(event) => {
                        if is_relevant_event(event.kind) {
                            // A full channel already has a reload queued.
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "filesystem watcher error");
                    }
                },
                notify::Config::default(),
            )?;
            watcher.watch(self.dir.as_ref(), RecursiveMode::Recursive)?;
            info!(dir = %self.dir.display(), "workflow watcher started");
            watcher
        };

        loop {
            if rx.recv().await.is_none() {
                debug!("workflow watcher channel closed, shutting down");
                break;
            }

            tokio::time::sleep(self.debounce).await;
            while rx.try_recv().is_ok() {}

            info!(dir = %self.dir.display(), "reloading workflows");
            match self.registry.load_directory(&self.dir) {
                Ok(count) => info!(count, "workflows reloaded"),
                Err(e) => error!(error = %e, "failed to reload workflows, keeping previous set"),
            }
        }

        Ok(())
    }
}

/// Returns `true` for filesystem events that may change a definition file.
fn is_relevant_event(kind: EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};

    use super::*;

    #[test]
    fn create_modify_remove_are_relevant() {
        assert!(is_relevant_event(EventKind::Create(CreateKind::File)));
        assert!(is_relevant_event(EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        ))));
        assert!(is_relevant_event(EventKind::Remove(RemoveKind::File)));
    }

    #[test]
    fn access_is_not_relevant() {
        assert!(!is_relevant_event(EventKind::Access(AccessKind::Read)));
    }

    #[tokio::test]
    async fn reloads_after_file_change() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(WorkflowRegistry::default().with_source_dir(dir.path()));
        let handle = WorkflowWatcher::new(Arc::clone(&registry), dir.path())
            .with_debounce(Duration::from_millis(50))
            .spawn();
        tokio::time::sleep(Duration::from_millis(200)).await;

        std::fs::write(
            dir.path().join("welcome.yaml"),
            "id: welcome\nname: Welcome\ntrigger:\n  type: manual\nactions: []\n",
        )
        .unwrap();

        let mut loaded = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if registry.snapshot().get("welcome").is_some() {
                loaded = true;
                break;
            }
        }
        handle.abort();
        assert!(loaded, "watcher should pick up the new definition");
    }
}
