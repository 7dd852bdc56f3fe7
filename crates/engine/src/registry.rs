use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};

use cadence_core::{CompiledSchedule, EventCatalog, Trigger, Workflow};

use crate::error::EngineError;

/// An immutable view of every registered workflow.
///
/// Runs in flight capture their own copy of the action list, so swapping the
/// snapshot never alters them.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    workflows: Vec<Arc<Workflow>>,
    by_id: HashMap<String, usize>,
    schedules: HashMap<String, CompiledSchedule>,
    version: u64,
    loaded_at: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    pub fn get(&self, workflow_id: &str) -> Option<&Arc<Workflow>> {
        self.by_id.get(workflow_id).map(|&idx| &self.workflows[idx])
    }

    /// Workflows in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Workflow>> {
        self.workflows.iter()
    }

    /// Compiled schedule of a schedule-triggered workflow.
    pub fn schedule(&self, workflow_id: &str) -> Option<&CompiledSchedule> {
        self.schedules.get(workflow_id)
    }

    /// Active workflows listening for `event_name`.
    pub fn by_event<'a>(&'a self, event_name: &'a str) -> impl Iterator<Item = &'a Arc<Workflow>> {
        self.workflows
            .iter()
            .filter(move |wf| wf.is_active() && wf.trigger.event_name() == Some(event_name))
    }

    /// Whether any active workflow listens on webhook `token`.
    pub fn has_webhook(&self, token: &str) -> bool {
        self.workflows.iter().any(|wf| {
            wf.is_active() && matches!(&wf.trigger, Trigger::Webhook { token: t, .. } if t == token)
        })
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Incremented on every successful replace.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}

/// A definition file holds either one workflow or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum DefinitionFile {
    Many(Vec<Workflow>),
    One(Box<Workflow>),
}

/// Read-mostly store of workflow definitions with atomic snapshot swaps.
#[derive(Debug)]
pub struct WorkflowRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    catalog: EventCatalog,
    source_dir: Option<PathBuf>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new(EventCatalog::builtin())
    }
}

impl WorkflowRegistry {
    pub fn new(catalog: EventCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            catalog,
            source_dir: None,
        }
    }

    /// Remember the directory that [`reload`](Self::reload) reads from.
    #[must_use]
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    /// The current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Validate `workflows` as a whole and swap them in atomically.
    ///
    /// On any error the previous snapshot stays in place.
    pub fn replace(&self, workflows: Vec<Workflow>) -> Result<usize, EngineError> {
        let mut seen = HashSet::new();
        let mut schedules = HashMap::new();
        for wf in &workflows {
            wf.validate()?;
            if !seen.insert(wf.id.clone()) {
                return Err(EngineError::DuplicateWorkflow(wf.id.clone()));
            }
            if let Trigger::Schedule(spec) = &wf.trigger {
                let compiled = spec
                    .compile()
                    .map_err(|e| EngineError::Configuration(format!("{}: {e}", wf.id)))?;
                schedules.insert(wf.id.clone(), compiled);
            }
            for issue in self.catalog.check(wf) {
                warn!(workflow.id = %wf.id, ?issue, "workflow references undeclared event data");
            }
        }

        let count = workflows.len();
        let mut guard = self.current.write();
        let next = RegistrySnapshot {
            by_id: workflows
                .iter()
                .enumerate()
                .map(|(idx, wf)| (wf.id.clone(), idx))
                .collect(),
            workflows: workflows.into_iter().map(Arc::new).collect(),
            schedules,
            version: guard.version + 1,
            loaded_at: Some(Utc::now()),
        };
        *guard = Arc::new(next);
        info!(count, version = guard.version, "workflow registry replaced");
        Ok(count)
    }

    /// Insert or replace a single workflow, keeping the others.
    pub fn upsert(&self, workflow: Workflow) -> Result<usize, EngineError> {
        let current = self.snapshot();
        let mut workflows: Vec<Workflow> = current.iter().map(|wf| (**wf).clone()).collect();
        match workflows.iter_mut().find(|wf| wf.id == workflow.id) {
            Some(existing) => *existing = workflow,
            None => workflows.push(workflow),
        }
        self.replace(workflows)
    }

    /// Load every `.yaml`, `.yml` and `.json` file under `dir` and replace
    /// the registry with their contents. Files are read in name order.
    pub fn load_directory(&self, dir: &Path) -> Result<usize, EngineError> {
        let workflows = read_directory(dir)?;
        self.replace(workflows)
    }

    /// Re-read the configured source directory.
    pub fn reload(&self) -> Result<usize, EngineError> {
        let dir = self.source_dir.as_deref().ok_or_else(|| {
            EngineError::Configuration("no workflow directory configured".into())
        })?;
        self.load_directory(dir)
    }
}

fn read_directory(dir: &Path) -> Result<Vec<Workflow>, EngineError> {
    let load_err = |path: &Path, reason: String| EngineError::Load {
        path: path.to_path_buf(),
        reason,
    };

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| load_err(dir, e.to_string()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml" | "yml" | "json")
            )
        })
        .collect();
    paths.sort();

    let mut workflows = Vec::new();
    for path in paths {
        let raw = std::fs::read_to_string(&path).map_err(|e| load_err(&path, e.to_string()))?;
        let parsed: DefinitionFile = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&raw).map_err(|e| load_err(&path, e.to_string()))?
        } else {
            serde_yaml_ng::from_str(&raw).map_err(|e| load_err(&path, e.to_string()))?
        };
        let before = workflows.len();
        match parsed {
            DefinitionFile::Many(list) => workflows.extend(list),
            DefinitionFile::One(wf) => workflows.push(*wf),
        }
        debug!(path = %path.display(), count = workflows.len() - before, "loaded workflow definitions");
    }
    Ok(workflows)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use cadence_core::{
        ActionKind, WaitConfig, WorkflowAction, WorkflowSettings, WorkflowStatus,
    };

    use super::*;

    fn workflow(id: &str, event: &str) -> Workflow {
        Workflow::new(id, id, Trigger::event(event))
            .with_action(WorkflowAction::new(1, ActionKind::Wait(WaitConfig::default())))
    }

    #[test]
    fn replace_swaps_snapshot_and_bumps_version() {
        let registry = WorkflowRegistry::default();
        let before = registry.snapshot();
        assert!(before.is_empty());

        registry
            .replace(vec![workflow("a", "policy.created"), workflow("b", "policy.created")])
            .unwrap();
        let after = registry.snapshot();
        assert_eq!(after.len(), 2);
        assert_eq!(after.version(), 1);
        assert!(before.is_empty(), "old snapshot is untouched");
        assert_eq!(after.by_event("policy.created").count(), 2);
    }

    #[test]
    fn invalid_set_keeps_previous_snapshot() {
        let registry = WorkflowRegistry::default();
        registry.replace(vec![workflow("a", "policy.created")]).unwrap();

        let bad = workflow("b", "policy.created").with_settings(WorkflowSettings {
            priority: 0,
            ..WorkflowSettings::default()
        });
        assert!(matches!(
            registry.replace(vec![bad]),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            registry.replace(vec![workflow("a", "x.y"), workflow("a", "x.y")]),
            Err(EngineError::DuplicateWorkflow(_))
        ));
        assert!(registry.snapshot().get("a").is_some());
        assert_eq!(registry.snapshot().version(), 1);
    }

    #[test]
    fn by_event_skips_inactive() {
        let registry = WorkflowRegistry::default();
        registry
            .replace(vec![
                workflow("live", "user.login"),
                workflow("paused", "user.login").with_status(WorkflowStatus::Paused),
            ])
            .unwrap();
        let snapshot = registry.snapshot();
        let ids: Vec<&str> = snapshot
            .by_event("user.login")
            .map(|wf| wf.id.as_str())
            .collect();
        assert_eq!(ids, vec!["live"]);
    }

    #[test]
    fn upsert_replaces_by_id() {
        let registry = WorkflowRegistry::default();
        registry.replace(vec![workflow("a", "user.login")]).unwrap();
        registry.upsert(workflow("a", "user.logout")).unwrap();
        registry.upsert(workflow("b", "user.logout")).unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.get("a").unwrap().trigger.event_name(),
            Some("user.logout")
        );
    }

    #[test]
    fn loads_yaml_and_json_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut yaml = std::fs::File::create(dir.path().join("10-onboarding.yaml")).unwrap();
        write!(
            yaml,
            r"
id: onboarding
name: Recruit onboarding
status: active
trigger:
  type: event
  eventName: recruit.phase_changed
actions:
  - order: 1
    type: wait
    config:
      waitMinutes: 5
"
        )
        .unwrap();
        std::fs::write(
            dir.path().join("20-renewals.json"),
            r#"[{"id":"renewals","name":"Renewals","status":"active",
                "trigger":{"type":"schedule","frequency":"daily","time":"08:00"},
                "actions":[]}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let registry = WorkflowRegistry::default().with_source_dir(dir.path());
        assert_eq!(registry.reload().unwrap(), 2);
        let snapshot = registry.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|wf| wf.id.as_str()).collect();
        assert_eq!(ids, vec!["onboarding", "renewals"]);
        assert!(snapshot.schedule("renewals").is_some());
        assert!(snapshot.schedule("onboarding").is_none());
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "id: [unclosed").unwrap();
        let registry = WorkflowRegistry::default();
        let err = registry.load_directory(dir.path()).unwrap_err();
        assert!(matches!(err, EngineError::Load { ref path, .. } if path.ends_with("broken.yaml")));
    }

    #[test]
    fn reload_without_directory_is_a_configuration_error() {
        let registry = WorkflowRegistry::default();
        assert!(matches!(
            registry.reload(),
            Err(EngineError::Configuration(_))
        ));
    }
}
