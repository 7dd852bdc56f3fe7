use serde::{Deserialize, Serialize};

/// The kind of state being stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Serialized workflow run.
    Run,
    /// Per-workflow listing of runs; ids are `{workflow_id}:{run_id}`.
    RunIndex,
    /// Runs started per workflow per calendar day.
    DailyRuns,
    /// Runs that included a recipient, per workflow.
    RecipientRuns,
    /// Cooldown claim per (workflow, recipient).
    Cooldown,
    /// Runs suspended on a delay or wait.
    PendingRuns,
    /// Cancellation requested for a run.
    CancelRequest,
    /// Claim on a schedule fire time, so it dispatches once.
    ScheduleClaim,
    Custom(String),
}

impl KeyKind {
    /// Return a string representation of the key kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Run => "run",
            Self::RunIndex => "run_index",
            Self::DailyRuns => "daily_runs",
            Self::RecipientRuns => "recipient_runs",
            Self::Cooldown => "cooldown",
            Self::PendingRuns => "pending_runs",
            Self::CancelRequest => "cancel_request",
            Self::ScheduleClaim => "schedule_claim",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key used to address state entries in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub namespace: String,
    pub kind: KeyKind,
    pub id: String,
}

impl StateKey {
    /// Create a new state key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, kind: KeyKind, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            id: id.into(),
        }
    }

    /// Return a canonical string representation: `namespace:kind:id`
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.namespace, self.kind, self.id)
    }

    /// Parse a canonical key back into its parts.
    ///
    /// The id may itself contain `:`. Custom kinds round-trip as
    /// [`KeyKind::Custom`].
    #[must_use]
    pub fn parse(canonical: &str) -> Option<Self> {
        let mut parts = canonical.splitn(3, ':');
        let namespace = parts.next()?;
        let kind = parts.next()?;
        let id = parts.next()?;
        let kind = match kind {
            "run" => KeyKind::Run,
            "run_index" => KeyKind::RunIndex,
            "daily_runs" => KeyKind::DailyRuns,
            "recipient_runs" => KeyKind::RecipientRuns,
            "cooldown" => KeyKind::Cooldown,
            "pending_runs" => KeyKind::PendingRuns,
            "cancel_request" => KeyKind::CancelRequest,
            "schedule_claim" => KeyKind::ScheduleClaim,
            other => KeyKind::Custom(other.to_owned()),
        };
        Some(Self::new(namespace, kind, id))
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}
