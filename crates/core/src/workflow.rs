use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::action::{ActionKind, ElseBranch, WorkflowAction};
use crate::condition::Condition;
use crate::error::WorkflowValidationError;
use crate::recipient::RecipientConfig;
use crate::trigger::Trigger;

/// Lifecycle status of a workflow definition. Only `Active` workflows
/// dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Archived,
}

/// Rate-limit and failure-handling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
    #[serde(default = "default_max_runs_per_day")]
    pub max_runs_per_day: u32,
    #[serde(default)]
    pub max_runs_per_recipient: Option<u32>,
    #[serde(default)]
    pub cooldown_minutes: Option<u32>,
    /// 1-100, higher is processed first.
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_max_runs_per_day() -> u32 {
    50
}

fn default_priority() -> u8 {
    50
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_runs_per_day: default_max_runs_per_day(),
            max_runs_per_recipient: None,
            cooldown_minutes: None,
            priority: default_priority(),
            continue_on_error: false,
        }
    }
}

/// A named, versioned automation definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Free-form grouping tag.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default = "default_version")]
    pub version: u32,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<WorkflowAction>,
    #[serde(default)]
    pub settings: WorkflowSettings,
    /// Run-level candidate recipients subject to admission control.
    #[serde(default)]
    pub audience: Option<RecipientConfig>,
}

fn default_version() -> u32 {
    1
}

impl Workflow {
    /// A new active workflow with default settings and no actions.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            category: None,
            status: WorkflowStatus::Active,
            version: default_version(),
            trigger,
            conditions: Vec::new(),
            actions: Vec::new(),
            settings: WorkflowSettings::default(),
            audience: None,
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: WorkflowAction) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: RecipientConfig) -> Self {
        self.audience = Some(audience);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }

    /// Actions sorted by ascending `order`.
    #[must_use]
    pub fn ordered_actions(&self) -> Vec<WorkflowAction> {
        let mut actions = self.actions.clone();
        actions.sort_by_key(|a| a.order);
        actions
    }

    /// Structural validation performed before a definition is registered.
    pub fn validate(&self) -> Result<(), WorkflowValidationError> {
        if self.id.trim().is_empty() {
            return Err(WorkflowValidationError::MissingId);
        }
        let invalid = |reason: String| WorkflowValidationError::Invalid {
            workflow: self.id.clone(),
            reason,
        };

        if !(1..=100).contains(&self.settings.priority) {
            return Err(invalid(format!(
                "priority {} outside 1-100",
                self.settings.priority
            )));
        }

        match &self.trigger {
            Trigger::Event { event_name, .. } if event_name.trim().is_empty() => {
                return Err(invalid("event trigger without an event name".into()));
            }
            Trigger::Schedule(spec) => {
                spec.compile()
                    .map_err(|e| invalid(format!("schedule: {e}")))?;
            }
            Trigger::Webhook { token, secret } if token.is_empty() || secret.is_empty() => {
                return Err(invalid("webhook trigger needs a token and a secret".into()));
            }
            _ => {}
        }

        let mut orders = HashSet::new();
        for action in &self.actions {
            if !orders.insert(action.order) {
                return Err(invalid(format!("duplicate action order {}", action.order)));
            }
        }

        for action in &self.actions {
            if let ActionKind::Branch(branch) = &action.kind
                && let ElseBranch::Jump(target) = branch.else_branch
                && (target <= action.order || !orders.contains(&target))
            {
                return Err(invalid(format!(
                    "branch {} jumps to {target}, which is not a later action",
                    action.id()
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::action::{ActionKind, BranchConfig, WaitConfig};
    use crate::condition::ConditionOperator;

    fn wait(order: u32) -> WorkflowAction {
        WorkflowAction::new(order, ActionKind::Wait(WaitConfig { wait_minutes: 0 }))
    }

    fn branch(order: u32, else_branch: ElseBranch) -> WorkflowAction {
        WorkflowAction::new(
            order,
            ActionKind::Branch(BranchConfig {
                branch_conditions: vec![Condition::new(
                    "x",
                    ConditionOperator::Equals,
                    json!(1),
                )],
                else_branch,
            }),
        )
    }

    #[test]
    fn defaults_from_minimal_definition() {
        let wf: Workflow = serde_json::from_value(json!({
            "id": "wf-1",
            "name": "Welcome",
            "trigger": {"type": "manual"}
        }))
        .unwrap();
        assert_eq!(wf.status, WorkflowStatus::Draft);
        assert_eq!(wf.settings.max_runs_per_day, 50);
        assert_eq!(wf.settings.priority, 50);
        assert!(!wf.settings.continue_on_error);
        assert!(wf.validate().is_ok());
    }

    #[test]
    fn ordered_actions_sorts_by_order() {
        let wf = Workflow::new("wf", "n", Trigger::Manual)
            .with_action(wait(3))
            .with_action(wait(1))
            .with_action(wait(2));
        let orders: Vec<u32> = wf.ordered_actions().iter().map(|a| a.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_duplicate_orders() {
        let wf = Workflow::new("wf", "n", Trigger::Manual)
            .with_action(wait(1))
            .with_action(wait(1));
        assert!(wf.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_priority() {
        let wf = Workflow::new("wf", "n", Trigger::Manual).with_settings(WorkflowSettings {
            priority: 0,
            ..WorkflowSettings::default()
        });
        assert!(wf.validate().is_err());
    }

    #[test]
    fn jump_must_point_forward_to_an_existing_action() {
        let ok = Workflow::new("wf", "n", Trigger::Manual)
            .with_action(branch(1, ElseBranch::Jump(3)))
            .with_action(wait(2))
            .with_action(wait(3));
        assert!(ok.validate().is_ok());

        let backwards = Workflow::new("wf", "n", Trigger::Manual)
            .with_action(wait(1))
            .with_action(branch(2, ElseBranch::Jump(1)));
        assert!(backwards.validate().is_err());

        let dangling = Workflow::new("wf", "n", Trigger::Manual)
            .with_action(branch(1, ElseBranch::Jump(9)));
        assert!(dangling.validate().is_err());
    }

    #[test]
    fn webhook_needs_secret() {
        let wf = Workflow::new(
            "wf",
            "n",
            Trigger::Webhook {
                token: "tok".into(),
                secret: String::new(),
            },
        );
        assert!(wf.validate().is_err());
    }
}
