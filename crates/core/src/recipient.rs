use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Default cap on the number of resolved recipients.
pub const DEFAULT_MAX_RECIPIENTS: usize = 50;

/// Abstract description of who an action (or a whole run) targets.
///
/// The strategy is selected by `type`; the remaining fields are common to
/// every strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientConfig {
    #[serde(flatten)]
    pub spec: RecipientSpec,
    /// Keep deactivated accounts in the result.
    #[serde(default)]
    pub include_inactive: bool,
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,
}

fn default_max_recipients() -> usize {
    DEFAULT_MAX_RECIPIENTS
}

impl RecipientConfig {
    /// Wrap a spec with the default options.
    #[must_use]
    pub fn new(spec: RecipientSpec) -> Self {
        Self {
            spec,
            include_inactive: false,
            max_recipients: DEFAULT_MAX_RECIPIENTS,
        }
    }

    #[must_use]
    pub fn with_max_recipients(mut self, max: usize) -> Self {
        self.max_recipients = max;
        self
    }

    #[must_use]
    pub fn including_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }
}

/// Recipient resolution strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecipientSpec {
    // Hierarchy-relative to the subject user of the run.
    #[serde(alias = "manager")]
    DirectUpline,
    DirectDownline,
    EntireDownline,
    UplineChain,

    // Role based.
    Role {
        #[serde(default)]
        roles: Vec<String>,
    },
    AllAgents,
    AllManagers,
    AllTrainers,
    Admins,

    // Event context.
    PolicyAgent,
    PolicyClient,
    CommissionRecipient,
    #[serde(alias = "eventuser")]
    EventUser,
    #[serde(alias = "current_user", alias = "triggeruser", alias = "currentuser")]
    TriggerUser,

    // Recruiting pipeline.
    #[serde(rename_all = "camelCase")]
    PipelinePhase {
        #[serde(default)]
        phase_ids: Vec<String>,
        #[serde(default)]
        phase_statuses: Vec<String>,
    },
    PipelineRecruiter,
    PipelineUpline,

    // Static.
    SpecificEmail {
        email: String,
    },
    EmailList {
        #[serde(default)]
        emails: Vec<String>,
    },

    /// Email address read from the run context.
    #[serde(rename_all = "camelCase")]
    DynamicField {
        field_path: String,
    },

    /// Any `type` this engine does not know. Resolves to nobody.
    #[serde(other)]
    Unknown,
}

impl RecipientSpec {
    /// Stable snake_case name, as written in workflow definitions.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DirectUpline => "direct_upline",
            Self::DirectDownline => "direct_downline",
            Self::EntireDownline => "entire_downline",
            Self::UplineChain => "upline_chain",
            Self::Role { .. } => "role",
            Self::AllAgents => "all_agents",
            Self::AllManagers => "all_managers",
            Self::AllTrainers => "all_trainers",
            Self::Admins => "admins",
            Self::PolicyAgent => "policy_agent",
            Self::PolicyClient => "policy_client",
            Self::CommissionRecipient => "commission_recipient",
            Self::EventUser => "event_user",
            Self::TriggerUser => "trigger_user",
            Self::PipelinePhase { .. } => "pipeline_phase",
            Self::PipelineRecruiter => "pipeline_recruiter",
            Self::PipelineUpline => "pipeline_upline",
            Self::SpecificEmail { .. } => "specific_email",
            Self::EmailList { .. } => "email_list",
            Self::DynamicField { .. } => "dynamic_field",
            Self::Unknown => "unknown",
        }
    }
}

/// A concrete, addressable recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    /// Platform user id. `None` for external contacts such as policy clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub email: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Recipient {
    #[must_use]
    pub fn user(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            email: email.into(),
            active: true,
        }
    }

    #[must_use]
    pub fn contact(email: impl Into<String>) -> Self {
        Self {
            user_id: None,
            email: email.into(),
            active: true,
        }
    }

    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Identity used for deduplication and per-recipient accounting: the user
    /// id when present, else the lowercased email.
    #[must_use]
    pub fn identity(&self) -> String {
        match &self.user_id {
            Some(id) => id.clone(),
            None => self.email.trim().to_lowercase(),
        }
    }
}

/// Output of recipient resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRecipients {
    pub recipients: Vec<Recipient>,
    pub emails: Vec<String>,
    pub user_ids: Vec<String>,
    pub count: usize,
    pub truncated: bool,
}

impl ResolvedRecipients {
    /// Apply the common post-step to raw candidates, in resolution order:
    /// dedupe by identity, drop inactive accounts unless `include_inactive`,
    /// then cap at `max_recipients`.
    #[must_use]
    pub fn from_candidates(
        candidates: impl IntoIterator<Item = Recipient>,
        include_inactive: bool,
        max_recipients: usize,
    ) -> Self {
        let mut seen = HashSet::new();
        let eligible: Vec<Recipient> = candidates
            .into_iter()
            .filter(|r| !r.email.trim().is_empty() || r.user_id.is_some())
            .filter(|r| include_inactive || r.active)
            .filter(|r| seen.insert(r.identity()))
            .collect();

        let truncated = eligible.len() > max_recipients;
        let mut recipients = eligible;
        recipients.truncate(max_recipients);
        Self::from_list(recipients, truncated)
    }

    /// Build from an already-filtered list.
    #[must_use]
    pub fn from_list(recipients: Vec<Recipient>, truncated: bool) -> Self {
        let emails = recipients
            .iter()
            .filter(|r| !r.email.is_empty())
            .map(|r| r.email.clone())
            .collect();
        let user_ids = recipients.iter().filter_map(|r| r.user_id.clone()).collect();
        Self {
            count: recipients.len(),
            recipients,
            emails,
            user_ids,
            truncated,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
