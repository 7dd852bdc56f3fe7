use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, warn};

use cadence_core::{
    EventCatalog, Recipient, ScheduleRecords, ScheduleSpec, Trigger, TriggerSource, Workflow,
    WorkflowRun, evaluate,
};
use cadence_executor::ActionExecutor;
use cadence_provider::HandlerRegistry;
use cadence_state::{KeyKind, StateKey, StateStore};

use crate::advance::PassClock;
use crate::dispatcher::{Candidate, Stimulus, match_workflows};
use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::rate_limit::{Admission, RateLimiter};
use crate::recipients::RecipientResolver;
use crate::registry::WorkflowRegistry;
use crate::report::{
    ActionPreview, DeniedWorkflow, DispatchFailure, DispatchReport, RunPreview, RunSummary,
};
use crate::tracker::RunTracker;

/// Schedule claims expire after two days.
const SCHEDULE_CLAIM_TTL: Duration = Duration::from_secs(2 * 24 * 3600);

/// Tunables for the [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Prefix of every state key the engine writes.
    pub namespace: String,
    /// Cadence of schedule ticks. A schedule fires on a tick when one of its
    /// fire times lies within the preceding window.
    pub schedule_window: Duration,
    /// TTL of the per-run lock. The lock is extended after every action and
    /// periodically while a handler runs.
    pub run_lock_ttl: Duration,
    /// How long to wait for a busy run lock.
    pub lock_wait: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: "cadence".to_owned(),
            schedule_window: Duration::from_secs(60),
            run_lock_ttl: Duration::from_secs(60),
            lock_wait: Duration::from_secs(5),
        }
    }
}

/// The workflow automation engine.
///
/// Matches stimuli to workflows, admits runs through the rate limiter and
/// interprets their actions until they finish or suspend. Build one with
/// [`EngineBuilder`](crate::EngineBuilder).
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) registry: Arc<WorkflowRegistry>,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) executor: ActionExecutor,
    pub(crate) resolver: RecipientResolver,
    pub(crate) limiter: RateLimiter,
    pub(crate) tracker: RunTracker,
    pub(crate) state: Arc<dyn StateStore>,
    pub(crate) metrics: Arc<EngineMetrics>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("workflows", &self.registry.snapshot().len())
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &EventCatalog {
        self.registry.catalog()
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn tracker(&self) -> &RunTracker {
        &self.tracker
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.schedule_window)
            .unwrap_or_else(|_| chrono::Duration::minutes(1))
    }

    /// Submit a domain event.
    pub async fn submit_event(
        &self,
        name: impl Into<String>,
        payload: Value,
    ) -> Result<DispatchReport, EngineError> {
        self.dispatch(Stimulus::Event {
            name: name.into(),
            payload,
        })
        .await
    }

    /// Submit an inbound webhook call. `body` must be a JSON object (or
    /// empty) and `signature` the hex HMAC-SHA256 of it under the
    /// workflow's secret.
    pub async fn submit_webhook(
        &self,
        token: impl Into<String>,
        body: Vec<u8>,
        signature: Option<String>,
    ) -> Result<DispatchReport, EngineError> {
        self.dispatch(Stimulus::Webhook {
            token: token.into(),
            body,
            signature,
        })
        .await
    }

    /// Start one workflow by id, whatever its trigger.
    pub async fn run_manual(
        &self,
        workflow_id: impl Into<String>,
        payload: Value,
        triggered_by: impl Into<String>,
    ) -> Result<DispatchReport, EngineError> {
        self.dispatch(Stimulus::Manual {
            workflow_id: workflow_id.into(),
            payload,
            triggered_by: triggered_by.into(),
        })
        .await
    }

    /// Fire the schedule-triggered workflows due at `at`.
    ///
    /// A schedule with a record source starts one run per record, each
    /// deduplicated by its own schedule claim.
    pub async fn tick(&self, at: DateTime<Utc>) -> Result<DispatchReport, EngineError> {
        let mut report = self
            .dispatch_at(
                Stimulus::Tick {
                    at,
                    payload: json!({}),
                },
                at,
            )
            .await?;

        let snapshot = self.registry.snapshot();
        for workflow in snapshot.iter().filter(|wf| wf.is_active()) {
            let Trigger::Schedule(ScheduleSpec {
                for_each: Some(records),
                ..
            }) = &workflow.trigger
            else {
                continue;
            };
            let Some(schedule) = snapshot.schedule(&workflow.id) else {
                continue;
            };
            let Some(fire_at) = schedule.fire_within(&at, self.window()) else {
                continue;
            };

            let payloads = match self.schedule_records(records, schedule.local_date(&fire_at)).await {
                Ok(payloads) => payloads,
                Err(e) => {
                    error!(workflow.id = %workflow.id, error = %e, "failed to load schedule records");
                    report.errors.push(DispatchFailure {
                        workflow_id: workflow.id.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            debug!(workflow.id = %workflow.id, records = payloads.len(), "schedule fans out");
            for payload in payloads {
                let fanned = self
                    .dispatch_at(
                        Stimulus::ScheduledRecord {
                            workflow_id: workflow.id.clone(),
                            at,
                            payload,
                        },
                        at,
                    )
                    .await?;
                report.merge(fanned);
            }
        }
        Ok(report)
    }

    /// One payload per record of `records` as of the local fire date.
    async fn schedule_records(
        &self,
        records: &ScheduleRecords,
        date: NaiveDate,
    ) -> Result<Vec<Value>, EngineError> {
        match records {
            ScheduleRecords::LicenseExpirations { within_days } => {
                let expiring = self
                    .resolver
                    .directory()
                    .license_expirations(date, *within_days)
                    .await?;
                Ok(expiring
                    .into_iter()
                    .map(|record| {
                        json!({
                            "eventUserId": record.user.id,
                            "user_id": record.user.id,
                            "user_email": record.user.email,
                            "license_expiration": record.expires_on.to_string(),
                            "days_until_expiration": record.days_until_expiration,
                        })
                    })
                    .collect())
            }
        }
    }

    pub async fn dispatch(&self, stimulus: Stimulus) -> Result<DispatchReport, EngineError> {
        self.dispatch_at(stimulus, Utc::now()).await
    }

    /// Dispatch `stimulus` as of `now`.
    ///
    /// Matched workflows are processed one after another in priority order;
    /// a failure in one is reported and does not stop the others.
    #[instrument(skip_all, fields(stimulus = stimulus.kind()))]
    pub async fn dispatch_at(
        &self,
        stimulus: Stimulus,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, EngineError> {
        self.metrics.increment_stimuli_received();
        let snapshot = self.registry.snapshot();
        let payload = stimulus_payload(&stimulus)?;
        let candidates = match_workflows(&snapshot, &stimulus, self.window());

        if candidates.is_empty() {
            match &stimulus {
                Stimulus::Webhook { token, .. } if snapshot.has_webhook(token) => {
                    warn!(token = %token, "webhook signature rejected");
                    return Err(EngineError::Unauthorized(token.clone()));
                }
                Stimulus::Webhook { token, .. } => {
                    return Err(EngineError::UnknownWebhook(token.clone()));
                }
                Stimulus::Manual { workflow_id, .. } => {
                    return Err(match snapshot.get(workflow_id) {
                        Some(_) => EngineError::WorkflowInactive(workflow_id.clone()),
                        None => EngineError::WorkflowNotFound(workflow_id.clone()),
                    });
                }
                _ => {
                    debug!("no workflow matched");
                    return Ok(DispatchReport::default());
                }
            }
        }

        let mut report = DispatchReport {
            matched: candidates.len(),
            ..DispatchReport::default()
        };
        for candidate in candidates {
            let workflow_id = candidate.workflow.id.clone();
            if let Err(e) = self.start_candidate(&candidate, &payload, now, &mut report).await {
                error!(workflow.id = %workflow_id, error = %e, "failed to start workflow");
                report.errors.push(DispatchFailure {
                    workflow_id,
                    error: e.to_string(),
                });
            }
        }
        Ok(report)
    }

    async fn start_candidate(
        &self,
        candidate: &Candidate,
        payload: &Value,
        now: DateTime<Utc>,
        report: &mut DispatchReport,
    ) -> Result<(), EngineError> {
        let workflow = &candidate.workflow;

        if let TriggerSource::Schedule { fire_at } = &candidate.source
            && !self.claim_schedule(workflow, fire_at, payload).await?
        {
            debug!(workflow.id = %workflow.id, %fire_at, "schedule fire already dispatched");
            report.matched -= 1;
            return Ok(());
        }

        let mut context = run_context(payload, &candidate.source, now);
        if !evaluate(&workflow.conditions, &context) {
            debug!(workflow.id = %workflow.id, "workflow conditions not met");
            self.metrics.increment_conditions_not_met();
            report.not_met.push(workflow.id.clone());
            return Ok(());
        }
        self.metrics.increment_workflows_matched();

        let audience = match &workflow.audience {
            Some(config) => Some(self.resolver.resolve(config, &context).await.recipients),
            None => None,
        };
        let has_audience = audience.is_some();
        let (recipients, dropped) = match self.limiter.admit(workflow, audience, now).await? {
            Admission::Admitted {
                recipients,
                dropped,
            } => (recipients, dropped),
            Admission::Denied { reason, dropped } => {
                self.metrics.increment_admissions_denied();
                report.denied.push(DeniedWorkflow {
                    workflow_id: workflow.id.clone(),
                    reason,
                    dropped,
                });
                return Ok(());
            }
        };

        if let Value::Object(map) = &mut context {
            map.insert("recipients".into(), serde_json::to_value(&recipients)?);
            map.insert("droppedRecipients".into(), serde_json::to_value(&dropped)?);
        }
        let admitted = has_audience.then(|| recipients.clone());
        let mut run = WorkflowRun::start(workflow, candidate.source.clone(), context, recipients, now);

        // The run is locked before it is stored so no other worker can see it
        // unowned. Until it is stored, failures hand the admission back.
        let guard = match self
            .tracker
            .lock_run(&run.id, self.config.run_lock_ttl, self.config.lock_wait)
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                self.release_admission(workflow, admitted.as_deref(), now).await;
                return Err(e);
            }
        };
        if let Err(e) = self.tracker.create(&run).await {
            if let Err(release_err) = guard.release().await {
                warn!(run.id = %run.id, error = %release_err, "failed to release run lock");
            }
            self.release_admission(workflow, admitted.as_deref(), now).await;
            return Err(e);
        }
        self.metrics.increment_runs_started();
        info!(
            workflow.id = %workflow.id,
            run.id = %run.id,
            source = %run.trigger_source,
            recipients = run.recipients.len(),
            "run started"
        );

        let outcome = self
            .drive(&mut run, guard.as_ref(), PassClock::starting_at(now))
            .await;
        if let Err(e) = guard.release().await {
            warn!(run.id = %run.id, error = %e, "failed to release run lock");
        }
        outcome?;

        report.started.push(RunSummary::of(&run, dropped.len()));
        Ok(())
    }

    async fn release_admission(
        &self,
        workflow: &Workflow,
        recipients: Option<&[Recipient]>,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = self.limiter.release(workflow, recipients, now).await {
            error!(workflow.id = %workflow.id, error = %e, "failed to release admission");
        }
    }

    /// Claim a schedule fire time for one payload so repeated or concurrent
    /// ticks dispatch it once.
    async fn claim_schedule(
        &self,
        workflow: &Workflow,
        fire_at: &DateTime<Utc>,
        payload: &Value,
    ) -> Result<bool, EngineError> {
        let digest = hex::encode(Sha256::digest(serde_json::to_vec(payload)?));
        let key = StateKey::new(
            self.config.namespace.as_str(),
            KeyKind::ScheduleClaim,
            format!("{}:{}:{digest}", workflow.id, fire_at.timestamp()),
        );
        Ok(self
            .state
            .check_and_set(&key, &Utc::now().to_rfc3339(), Some(SCHEDULE_CLAIM_TTL))
            .await?)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<WorkflowRun, EngineError> {
        self.tracker
            .load(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_owned()))
    }

    /// Runs of a workflow, newest first.
    pub async fn list_runs(&self, workflow_id: &str) -> Result<Vec<WorkflowRun>, EngineError> {
        self.tracker.list(workflow_id).await
    }

    /// Cancel a run. Idempotent: a terminal run is returned unchanged.
    ///
    /// If another task holds the run, the cancel marker written first makes
    /// that task cancel the run before its next action, and the run is
    /// returned as currently persisted.
    #[instrument(skip(self, reason))]
    pub async fn cancel_run(
        &self,
        run_id: &str,
        reason: Option<String>,
    ) -> Result<WorkflowRun, EngineError> {
        let run = self.get_run(run_id).await?;
        if run.is_terminal() {
            return Ok(run);
        }

        self.tracker.request_cancel(run_id, reason.as_deref()).await?;
        let guard = match self
            .tracker
            .lock_run(run_id, self.config.run_lock_ttl, self.config.lock_wait)
            .await
        {
            Ok(guard) => guard,
            Err(EngineError::LockFailed(_)) => {
                info!("run is busy, cancellation applies before its next action");
                return Ok(run);
            }
            Err(e) => return Err(e),
        };

        let outcome = self.cancel_locked(run_id, reason, Utc::now()).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "failed to release run lock");
        }
        outcome
    }

    async fn cancel_locked(
        &self,
        run_id: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<WorkflowRun, EngineError> {
        let mut run = self.get_run(run_id).await?;
        if !run.is_terminal() {
            run.cancel(reason, now)?;
            match self.tracker.persist(&run).await? {
                None => {
                    self.metrics.increment_runs_cancelled();
                    info!(workflow.id = %run.workflow_id, "run cancelled");
                }
                Some(stored) => run = stored,
            }
        }
        self.tracker.clear_continuation(run_id).await?;
        self.tracker.clear_cancel_request(run_id).await?;
        Ok(run)
    }

    /// Re-read workflow definitions from the configured directory.
    pub fn reload(&self) -> Result<usize, EngineError> {
        self.registry.reload()
    }

    /// Evaluate `workflow_id` against `payload` without side effects.
    pub async fn preview(
        &self,
        workflow_id: &str,
        payload: Value,
    ) -> Result<RunPreview, EngineError> {
        let workflow = self
            .registry
            .snapshot()
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_owned()))?;
        let now = Utc::now();
        let payload = object_payload(payload)?;
        let source = TriggerSource::Manual {
            triggered_by: "preview".into(),
        };
        let mut context = run_context(&payload, &source, now);

        let audience = match &workflow.audience {
            Some(config) => Some(self.resolver.resolve(config, &context).await),
            None => None,
        };
        if let (Some(resolved), Value::Object(map)) = (&audience, &mut context) {
            map.insert("recipients".into(), serde_json::to_value(&resolved.recipients)?);
        }

        let mut actions = Vec::with_capacity(workflow.actions.len());
        for action in workflow.ordered_actions() {
            let recipients = match action.kind.recipients() {
                Some(config) if action.kind.needs_recipients() => {
                    Some(self.resolver.resolve(config, &context).await)
                }
                _ => None,
            };
            let action_type = action.action_type();
            actions.push(ActionPreview {
                action_id: action.id(),
                order: action.order,
                action_type,
                delay_minutes: action.delay_minutes,
                conditions_met: evaluate(&action.conditions, &context),
                recipients,
                handler_registered: action_type.is_control_flow()
                    || self.handlers.get(action_type).is_some(),
            });
        }

        Ok(RunPreview {
            workflow_id: workflow.id.clone(),
            conditions_met: evaluate(&workflow.conditions, &context),
            audience,
            runs_today: self.limiter.runs_today(&workflow.id, now).await?,
            max_runs_per_day: workflow.settings.max_runs_per_day,
            actions,
        })
    }
}

/// Payloads are JSON objects; `null` counts as empty.
fn object_payload(payload: Value) -> Result<Value, EngineError> {
    match payload {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(payload),
        other => Err(EngineError::InvalidPayload(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

fn stimulus_payload(stimulus: &Stimulus) -> Result<Value, EngineError> {
    match stimulus {
        Stimulus::Event { payload, .. }
        | Stimulus::Tick { payload, .. }
        | Stimulus::ScheduledRecord { payload, .. }
        | Stimulus::Manual { payload, .. } => object_payload(payload.clone()),
        Stimulus::Webhook { body, .. } if body.iter().all(u8::is_ascii_whitespace) => {
            Ok(Value::Object(Map::new()))
        }
        Stimulus::Webhook { body, .. } => {
            let parsed: Value = serde_json::from_slice(body)
                .map_err(|e| EngineError::InvalidPayload(e.to_string()))?;
            object_payload(parsed)
        }
    }
}

/// The context a run starts with: the payload plus the trigger variables.
fn run_context(payload: &Value, source: &TriggerSource, now: DateTime<Utc>) -> Value {
    let mut map = payload.as_object().cloned().unwrap_or_default();
    let from_payload = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_owned);

    let event_name = match source {
        TriggerSource::Event { name } => name.clone(),
        TriggerSource::Schedule { .. } => from_payload("eventName").unwrap_or_else(|| "schedule".into()),
        TriggerSource::Webhook { .. } => from_payload("eventName").unwrap_or_else(|| "webhook".into()),
        TriggerSource::Manual { .. } => from_payload("eventName").unwrap_or_else(|| "manual".into()),
    };
    let triggered_by = match source {
        TriggerSource::Manual { triggered_by } => triggered_by.clone(),
        _ => from_payload("triggeredBy").unwrap_or_else(|| "system".into()),
    };

    map.insert("eventName".into(), Value::String(event_name));
    map.insert("triggeredAt".into(), Value::String(now.to_rfc3339()));
    map.insert("triggeredBy".into(), Value::String(triggered_by));
    map.insert("triggerSource".into(), Value::String(source.to_string()));
    if let TriggerSource::Schedule { fire_at } = source {
        map.insert("scheduledFor".into(), Value::String(fire_at.to_rfc3339()));
    }
    map.entry("recipients").or_insert_with(|| Value::Array(Vec::new()));
    map.entry("droppedRecipients").or_insert_with(|| Value::Array(Vec::new()));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_adds_trigger_variables() {
        let now = Utc::now();
        let ctx = run_context(
            &json!({"policyId": "p-1", "triggeredBy": "u-9", "eventName": "spoofed"}),
            &TriggerSource::Event {
                name: "policy.created".into(),
            },
            now,
        );
        assert_eq!(ctx["policyId"], "p-1");
        assert_eq!(ctx["eventName"], "policy.created");
        assert_eq!(ctx["triggeredBy"], "u-9");
        assert_eq!(ctx["triggerSource"], "event:policy.created");
        assert_eq!(ctx["recipients"], json!([]));

        let manual = run_context(
            &json!({}),
            &TriggerSource::Manual {
                triggered_by: "ops".into(),
            },
            now,
        );
        assert_eq!(manual["triggeredBy"], "ops");
        assert_eq!(manual["eventName"], "manual");

        let system = run_context(&json!({}), &TriggerSource::Webhook { token: "t".into() }, now);
        assert_eq!(system["triggeredBy"], "system");
    }

    #[test]
    fn payload_must_be_an_object() {
        assert_eq!(object_payload(Value::Null).unwrap(), json!({}));
        assert!(matches!(
            object_payload(json!([1, 2])),
            Err(EngineError::InvalidPayload(_))
        ));
        let blank = Stimulus::Webhook {
            token: "t".into(),
            body: b"  ".to_vec(),
            signature: None,
        };
        assert_eq!(stimulus_payload(&blank).unwrap(), json!({}));
        let garbage = Stimulus::Webhook {
            token: "t".into(),
            body: b"{nope".to_vec(),
            signature: None,
        };
        assert!(matches!(
            stimulus_payload(&garbage),
            Err(EngineError::InvalidPayload(_))
        ));
    }
}
