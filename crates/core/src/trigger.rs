use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::schedule::ScheduleSpec;

/// The stimulus that makes a workflow eligible to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// A named domain event, optionally gated on payload fields.
    #[serde(rename_all = "camelCase")]
    Event {
        event_name: String,
        #[serde(default)]
        conditions: Vec<Condition>,
    },
    Schedule(ScheduleSpec),
    /// An inbound HTTP call to `/webhooks/{token}` signed with `secret`.
    Webhook { token: String, secret: String },
    Manual,
}

impl Trigger {
    #[must_use]
    pub fn event(name: impl Into<String>) -> Self {
        Self::Event {
            event_name: name.into(),
            conditions: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event { .. } => "event",
            Self::Schedule(_) => "schedule",
            Self::Webhook { .. } => "webhook",
            Self::Manual => "manual",
        }
    }

    /// The event name, for event triggers.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Self::Event { event_name, .. } => Some(event_name),
            _ => None,
        }
    }
}
