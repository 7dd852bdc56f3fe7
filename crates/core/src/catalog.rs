use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::action::ActionKind;
use crate::condition::Condition;
use crate::trigger::Trigger;
use crate::workflow::Workflow;

/// Context keys the engine adds to every run, whatever the event.
pub const ENGINE_CONTEXT_KEYS: &[&str] = &[
    "eventName",
    "triggeredAt",
    "triggeredBy",
    "triggerSource",
    "recipients",
    "droppedRecipients",
    "results",
];

/// A declarable event and the payload variables it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEventType {
    pub event_name: String,
    pub category: String,
    pub description: String,
    /// Variable name to type hint (`"string"`, `"number"`, ...).
    #[serde(default)]
    pub available_variables: BTreeMap<String, String>,
}

impl TriggerEventType {
    fn new(name: &str, category: &str, description: &str, vars: &[(&str, &str)]) -> Self {
        Self {
            event_name: name.to_owned(),
            category: category.to_owned(),
            description: description.to_owned(),
            available_variables: vars
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        }
    }
}

/// A finding from checking a workflow against the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum CatalogIssue {
    UnknownEvent { event: String },
    UnknownField { event: String, field: String },
}

/// Descriptive metadata about the events workflows may listen for.
#[derive(Debug, Clone, Default)]
pub struct EventCatalog {
    events: HashMap<String, TriggerEventType>,
}

impl EventCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The events the platform emits out of the box.
    #[must_use]
    pub fn builtin() -> Self {
        let subject = [("recipientId", "string"), ("recipientEmail", "string")];
        let with = |extra: &[(&'static str, &'static str)]| -> Vec<(&'static str, &'static str)> {
            subject.iter().chain(extra.iter()).copied().collect()
        };
        let recruit = with(&[
            ("recruitId", "string"),
            ("recruitName", "string"),
            ("recruiterId", "string"),
            ("phaseId", "string"),
        ]);
        let policy = with(&[
            ("policyId", "string"),
            ("policyNumber", "string"),
            ("carrier", "string"),
            ("product", "string"),
            ("annualPremium", "number"),
            ("days_until_expiration", "number"),
        ]);
        let commission = with(&[
            ("commissionId", "string"),
            ("policyId", "string"),
            ("amount", "number"),
        ]);
        let user = with(&[("userId", "string"), ("email", "string")]);
        let email = with(&[("messageId", "string"), ("templateId", "string")]);
        let lead = with(&[("packId", "string"), ("leadCount", "number"), ("conversionRate", "number")]);

        let mut phase_changed = recruit.clone();
        phase_changed.extend([("old_phase", "string"), ("new_phase", "string")]);
        let mut role_changed = user.clone();
        role_changed.extend([("oldRole", "string"), ("newRole", "string")]);

        let events = [
            TriggerEventType::new("recruit.created", "recruit", "A recruit entered the pipeline", &recruit),
            TriggerEventType::new("recruit.phase_changed", "recruit", "A recruit moved to another pipeline phase", &phase_changed),
            TriggerEventType::new("recruit.graduated_to_agent", "recruit", "A recruit became a licensed agent", &recruit),
            TriggerEventType::new("recruit.dropped_out", "recruit", "A recruit left the pipeline", &recruit),
            TriggerEventType::new("policy.created", "policy", "A policy was written", &policy),
            TriggerEventType::new("policy.approved", "policy", "A policy was approved by the carrier", &policy),
            TriggerEventType::new("policy.cancelled", "policy", "A policy was cancelled", &policy),
            TriggerEventType::new("policy.renewed", "policy", "A policy renewed", &policy),
            TriggerEventType::new("commission.earned", "commission", "A commission was earned", &commission),
            TriggerEventType::new("commission.chargeback", "commission", "A commission was charged back", &commission),
            TriggerEventType::new("commission.paid", "commission", "A commission was paid out", &commission),
            TriggerEventType::new("user.login", "user", "A user signed in", &user),
            TriggerEventType::new("user.logout", "user", "A user signed out", &user),
            TriggerEventType::new("user.role_changed", "user", "A user's role changed", &role_changed),
            TriggerEventType::new("email.sent", "email", "An email was delivered to the provider", &email),
            TriggerEventType::new("email.failed", "email", "An email could not be sent", &email),
            TriggerEventType::new("email.bounced", "email", "An email bounced", &email),
            TriggerEventType::new("lead.pack_purchased", "lead", "A lead pack was purchased", &lead),
            TriggerEventType::new("lead.conversion_threshold", "lead", "Lead conversion crossed a threshold", &lead),
            TriggerEventType::new("custom.trigger", "custom", "Operator-defined event", &subject),
        ];

        let mut catalog = Self::new();
        for event in events {
            catalog.register(event);
        }
        catalog
    }

    pub fn register(&mut self, event: TriggerEventType) {
        self.events.insert(event.event_name.clone(), event);
    }

    #[must_use]
    pub fn get(&self, event_name: &str) -> Option<&TriggerEventType> {
        self.events.get(event_name)
    }

    /// All events, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<&TriggerEventType> {
        let mut events: Vec<_> = self.events.values().collect();
        events.sort_by(|a, b| a.event_name.cmp(&b.event_name));
        events
    }

    /// Report condition fields of an event-triggered workflow that the event
    /// does not declare. Other trigger kinds carry free-form payloads and are
    /// not checked. `custom.trigger` accepts any field.
    #[must_use]
    pub fn check(&self, workflow: &Workflow) -> Vec<CatalogIssue> {
        let Trigger::Event {
            event_name,
            conditions: trigger_conditions,
        } = &workflow.trigger
        else {
            return Vec::new();
        };
        let Some(event) = self.get(event_name) else {
            return vec![CatalogIssue::UnknownEvent {
                event: event_name.clone(),
            }];
        };
        if event.category == "custom" {
            return Vec::new();
        }

        let mut conditions: Vec<&Condition> = trigger_conditions.iter().collect();
        conditions.extend(&workflow.conditions);
        for action in &workflow.actions {
            conditions.extend(&action.conditions);
            if let ActionKind::Branch(branch) = &action.kind {
                conditions.extend(&branch.branch_conditions);
            }
        }

        let mut issues = Vec::new();
        for condition in conditions {
            let root = condition.field.split('.').next().unwrap_or_default();
            let known = event.available_variables.contains_key(root)
                || ENGINE_CONTEXT_KEYS.contains(&root);
            let issue = CatalogIssue::UnknownField {
                event: event_name.clone(),
                field: condition.field.clone(),
            };
            if !known && !issues.contains(&issue) {
                issues.push(issue);
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::condition::ConditionOperator;

    #[test]
    fn builtin_catalog_lists_events() {
        let catalog = EventCatalog::builtin();
        assert_eq!(catalog.list().len(), 20);
        let phase = catalog.get("recruit.phase_changed").unwrap();
        assert!(phase.available_variables.contains_key("new_phase"));
    }

    #[test]
    fn reports_undeclared_fields() {
        let catalog = EventCatalog::builtin();
        let wf = Workflow::new("wf", "n", Trigger::event("recruit.phase_changed")).with_conditions(
            vec![
                Condition::new("new_phase", ConditionOperator::Equals, json!("Licensed")),
                Condition::new("results.action-1.decision", ConditionOperator::Equals, json!("x")),
                Condition::new("premium", ConditionOperator::GreaterThan, json!(1)),
            ],
        );
        assert_eq!(
            catalog.check(&wf),
            vec![CatalogIssue::UnknownField {
                event: "recruit.phase_changed".into(),
                field: "premium".into(),
            }]
        );
    }

    #[test]
    fn unknown_event_and_other_triggers() {
        let catalog = EventCatalog::builtin();
        let wf = Workflow::new("wf", "n", Trigger::event("policy.exploded"));
        assert_eq!(
            catalog.check(&wf),
            vec![CatalogIssue::UnknownEvent {
                event: "policy.exploded".into()
            }]
        );
        let wf = Workflow::new("wf", "n", Trigger::Manual).with_conditions(vec![Condition::new(
            "anything",
            ConditionOperator::Equals,
            json!(1),
        )]);
        assert!(catalog.check(&wf).is_empty());
    }
}
