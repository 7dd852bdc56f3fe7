//! Pure matching of incoming stimuli against registered workflows.

use std::cmp::Reverse;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use cadence_core::{Trigger, TriggerSource, Workflow, evaluate, signature};

use crate::registry::RegistrySnapshot;

/// Something that may start workflow runs.
#[derive(Debug, Clone)]
pub enum Stimulus {
    /// A named domain event with a flat payload.
    Event { name: String, payload: Value },
    /// A scheduler tick. `payload` is handed to every schedule run it starts.
    /// Schedules that fan out over records are not matched by ticks.
    Tick { at: DateTime<Utc>, payload: Value },
    /// One record of a fanned-out schedule fire, for that workflow only.
    ScheduledRecord {
        workflow_id: String,
        at: DateTime<Utc>,
        payload: Value,
    },
    /// An inbound webhook call, verified against the workflow's secret.
    Webhook {
        token: String,
        body: Vec<u8>,
        signature: Option<String>,
    },
    /// An operator starting one workflow by id.
    Manual {
        workflow_id: String,
        payload: Value,
        triggered_by: String,
    },
}

impl Stimulus {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event { .. } => "event",
            Self::Tick { .. } | Self::ScheduledRecord { .. } => "schedule",
            Self::Webhook { .. } => "webhook",
            Self::Manual { .. } => "manual",
        }
    }
}

/// A workflow selected for a stimulus, with the source its run records.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub workflow: Arc<Workflow>,
    pub source: TriggerSource,
}

/// Select the active workflows whose trigger matches `stimulus`, highest
/// priority first. Ties keep registration order.
///
/// `window` is the schedule tick cadence: a schedule matches a tick when
/// one of its fire times lies in `(at - window, at]`.
pub fn match_workflows(
    snapshot: &RegistrySnapshot,
    stimulus: &Stimulus,
    window: chrono::Duration,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = snapshot
        .iter()
        .filter(|wf| wf.is_active())
        .filter_map(|wf| {
            matches(snapshot, wf, stimulus, window).map(|source| Candidate {
                workflow: Arc::clone(wf),
                source,
            })
        })
        .collect();
    candidates.sort_by_key(|c| Reverse(c.workflow.settings.priority));
    candidates
}

fn matches(
    snapshot: &RegistrySnapshot,
    workflow: &Workflow,
    stimulus: &Stimulus,
    window: chrono::Duration,
) -> Option<TriggerSource> {
    match (&workflow.trigger, stimulus) {
        (
            Trigger::Event {
                event_name,
                conditions,
            },
            Stimulus::Event { name, payload },
        ) => (event_name == name && evaluate(conditions, payload)).then(|| TriggerSource::Event {
            name: name.clone(),
        }),
        (Trigger::Schedule(spec), Stimulus::Tick { at, .. }) if spec.for_each.is_none() => snapshot
            .schedule(&workflow.id)
            .and_then(|schedule| schedule.fire_within(at, window))
            .map(|fire_at| TriggerSource::Schedule { fire_at }),
        (
            Trigger::Schedule(spec),
            Stimulus::ScheduledRecord {
                workflow_id, at, ..
            },
        ) if spec.for_each.is_some() && &workflow.id == workflow_id => snapshot
            .schedule(&workflow.id)
            .and_then(|schedule| schedule.fire_within(at, window))
            .map(|fire_at| TriggerSource::Schedule { fire_at }),
        (
            Trigger::Webhook { token, secret },
            Stimulus::Webhook {
                token: called,
                body,
                signature: provided,
            },
        ) => (token == called
            && provided
                .as_deref()
                .is_some_and(|sig| signature::verify(secret, body, sig)))
        .then(|| TriggerSource::Webhook {
            token: token.clone(),
        }),
        (
            _,
            Stimulus::Manual {
                workflow_id,
                triggered_by,
                ..
            },
        ) => (&workflow.id == workflow_id).then(|| TriggerSource::Manual {
            triggered_by: triggered_by.clone(),
        }),
        _ => None,
    }
}
