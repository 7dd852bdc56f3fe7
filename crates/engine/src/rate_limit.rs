use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use cadence_core::{DenialReason, DroppedRecipient, Recipient, Workflow};
use cadence_state::{CasResult, KeyKind, StateKey, StateStore};

use crate::error::EngineError;

/// Daily counters expire a day after the date they count.
const DAILY_COUNTER_TTL: Duration = Duration::from_secs(48 * 3600);

/// Cooldown identity used when a workflow has no audience.
const WHOLE_WORKFLOW: &str = "*";

/// Cooldown claims outlive their window by this much before the store drops
/// them. Expiry is cleanup only; the window is checked against the stored
/// claim time.
const COOLDOWN_GRACE: Duration = Duration::from_secs(3600);

/// Contended cooldown claims are retried this often before denying.
const CLAIM_ATTEMPTS: usize = 3;

/// Result of admission control for one matched workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Start a run for `recipients`; `dropped` were excluded.
    Admitted {
        recipients: Vec<Recipient>,
        dropped: Vec<DroppedRecipient>,
    },
    /// Create no run.
    Denied {
        reason: DenialReason,
        dropped: Vec<DroppedRecipient>,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// Enforces per-workflow daily caps, per-recipient caps and cooldowns.
///
/// Every gate is a single atomic store operation (`increment`,
/// `check_and_set` or `compare_and_swap`), so concurrent admissions cannot
/// both slip under a cap. A gate that fails after earlier ones passed rolls
/// those back. Cooldowns are measured on the admission clock, not the
/// store's.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<dyn StateStore>,
    namespace: String,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(state: Arc<dyn StateStore>, namespace: impl Into<String>) -> Self {
        Self {
            state,
            namespace: namespace.into(),
        }
    }

    fn key(&self, kind: KeyKind, id: String) -> StateKey {
        StateKey::new(self.namespace.as_str(), kind, id)
    }

    fn daily_key(&self, workflow_id: &str, now: DateTime<Utc>) -> StateKey {
        self.key(
            KeyKind::DailyRuns,
            format!("{workflow_id}:{}", now.format("%Y-%m-%d")),
        )
    }

    fn cooldown_key(&self, workflow_id: &str, identity: &str) -> StateKey {
        self.key(KeyKind::Cooldown, format!("{workflow_id}:{identity}"))
    }

    fn recipient_key(&self, workflow_id: &str, identity: &str) -> StateKey {
        self.key(KeyKind::RecipientRuns, format!("{workflow_id}:{identity}"))
    }

    /// Runs admitted for `workflow_id` on the UTC day of `now`.
    pub async fn runs_today(&self, workflow_id: &str, now: DateTime<Utc>) -> Result<u32, EngineError> {
        let raw = self.state.get(&self.daily_key(workflow_id, now)).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Admit a run of `workflow`.
    ///
    /// `audience` is the resolved run-level candidate set, or `None` when the
    /// workflow declares no audience; the cooldown then applies to the
    /// workflow as a whole.
    #[instrument(skip_all, fields(workflow.id = %workflow.id))]
    pub async fn admit(
        &self,
        workflow: &Workflow,
        audience: Option<Vec<Recipient>>,
        now: DateTime<Utc>,
    ) -> Result<Admission, EngineError> {
        if audience.as_ref().is_some_and(Vec::is_empty) {
            debug!("audience resolved to nobody");
            return Ok(Admission::Denied {
                reason: DenialReason::NoRecipients,
                dropped: Vec::new(),
            });
        }

        let settings = &workflow.settings;
        let daily = self.daily_key(&workflow.id, now);
        let count = self.state.increment(&daily, 1, Some(DAILY_COUNTER_TTL)).await?;
        if count > i64::from(settings.max_runs_per_day) {
            self.state.increment(&daily, -1, None).await?;
            let reason = DenialReason::DailyLimit {
                limit: settings.max_runs_per_day,
            };
            info!(%reason, "admission denied");
            return Ok(Admission::Denied {
                reason,
                dropped: Vec::new(),
            });
        }

        let Some(candidates) = audience else {
            if let Some(reason) = self.claim_cooldown(workflow, WHOLE_WORKFLOW, now).await? {
                self.state.increment(&daily, -1, None).await?;
                info!(%reason, "admission denied");
                return Ok(Admission::Denied {
                    reason,
                    dropped: Vec::new(),
                });
            }
            return Ok(Admission::Admitted {
                recipients: Vec::new(),
                dropped: Vec::new(),
            });
        };

        let mut admitted = Vec::with_capacity(candidates.len());
        let mut dropped = Vec::new();
        for recipient in candidates {
            match self.admit_recipient(workflow, &recipient, now).await? {
                None => admitted.push(recipient),
                Some(reason) => {
                    debug!(recipient = %recipient.identity(), %reason, "recipient dropped");
                    dropped.push(DroppedRecipient { recipient, reason });
                }
            }
        }

        if admitted.is_empty() {
            self.state.increment(&daily, -1, None).await?;
            info!(dropped = dropped.len(), "admission denied, no admissible recipients");
            return Ok(Admission::Denied {
                reason: DenialReason::NoRecipients,
                dropped,
            });
        }
        if !dropped.is_empty() {
            info!(
                admitted = admitted.len(),
                dropped = dropped.len(),
                "partial admission"
            );
        }
        Ok(Admission::Admitted {
            recipients: admitted,
            dropped,
        })
    }

    /// Undo an admission whose run could not be started. `recipients` is
    /// `None` for a workflow without an audience.
    #[instrument(skip_all, fields(workflow.id = %workflow.id))]
    pub async fn release(
        &self,
        workflow: &Workflow,
        recipients: Option<&[Recipient]>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.state
            .increment(&self.daily_key(&workflow.id, now), -1, None)
            .await?;
        let cooldown = workflow.settings.cooldown_minutes.is_some_and(|m| m > 0);
        let Some(recipients) = recipients else {
            if cooldown {
                self.state
                    .delete(&self.cooldown_key(&workflow.id, WHOLE_WORKFLOW))
                    .await?;
            }
            return Ok(());
        };
        for recipient in recipients {
            let identity = recipient.identity();
            if cooldown {
                self.state
                    .delete(&self.cooldown_key(&workflow.id, &identity))
                    .await?;
            }
            if workflow.settings.max_runs_per_recipient.is_some() {
                self.state
                    .increment(&self.recipient_key(&workflow.id, &identity), -1, None)
                    .await?;
            }
        }
        info!(recipients = recipients.len(), "admission released");
        Ok(())
    }

    /// Claim the cooldown slot for `identity` at `now`. Returns the denial
    /// if a claim made less than the cooldown before `now` holds it.
    async fn claim_cooldown(
        &self,
        workflow: &Workflow,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DenialReason>, EngineError> {
        let Some(minutes) = workflow.settings.cooldown_minutes.filter(|m| *m > 0) else {
            return Ok(None);
        };
        let denied = DenialReason::Cooldown { minutes };
        let key = self.cooldown_key(&workflow.id, identity);
        let window = chrono::Duration::minutes(i64::from(minutes));
        let ttl = Duration::from_secs(u64::from(minutes) * 60) + COOLDOWN_GRACE;
        let stamp = now.to_rfc3339();

        for _ in 0..CLAIM_ATTEMPTS {
            let claimed = match self.state.get(&key).await? {
                None => self.state.check_and_set(&key, &stamp, Some(ttl)).await?,
                Some(previous) => {
                    let held = DateTime::parse_from_rfc3339(&previous)
                        .is_ok_and(|claimed_at| now < claimed_at.with_timezone(&Utc) + window);
                    if held {
                        return Ok(Some(denied));
                    }
                    let swapped = self
                        .state
                        .compare_and_swap(&key, &previous, &stamp, Some(ttl))
                        .await?;
                    swapped == CasResult::Ok
                }
            };
            if claimed {
                return Ok(None);
            }
        }
        warn!(identity, "cooldown claim contended, denying");
        Ok(Some(denied))
    }

    async fn admit_recipient(
        &self,
        workflow: &Workflow,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> Result<Option<DenialReason>, EngineError> {
        let identity = recipient.identity();
        if let Some(reason) = self.claim_cooldown(workflow, &identity, now).await? {
            return Ok(Some(reason));
        }

        let Some(limit) = workflow.settings.max_runs_per_recipient else {
            return Ok(None);
        };
        let counter = self.recipient_key(&workflow.id, &identity);
        let runs = self.state.increment(&counter, 1, None).await?;
        if runs <= i64::from(limit) {
            return Ok(None);
        }

        self.state.increment(&counter, -1, None).await?;
        if workflow.settings.cooldown_minutes.is_some_and(|m| m > 0) {
            self.state
                .delete(&self.cooldown_key(&workflow.id, &identity))
                .await?;
        }
        Ok(Some(DenialReason::RecipientLimit { limit }))
    }
}
