//! The run interpreter: walks a run's captured actions in order until the
//! run finishes or suspends on a delay.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use cadence_core::{
    ActionKind, ActionLogEntry, ActionLogStatus, BranchConfig, DroppedRecipient, ElseBranch,
    ResolvedRecipients, WorkflowAction, WorkflowRun, evaluate,
};
use cadence_executor::{HandlerFailure, HandlerOutcome, RetryPolicy};
use cadence_provider::{ActionInvocation, HandlerError};
use cadence_state::LockGuard;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::tracker::keep_alive;

/// A pass that fails part-way is picked up again after this long.
const PASS_RETRY_DELAY: Duration = Duration::from_secs(60);

/// What the interpreter does after handling the action at the cursor.
enum Step {
    /// Move on to the action at the new cursor.
    Next,
    /// The run suspended or reached a terminal state.
    Stop,
}

/// Wall time during one interpreter pass: the time the pass started at,
/// advanced by the monotonic time spent since.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PassClock {
    at: DateTime<Utc>,
    started: Instant,
}

impl PassClock {
    pub(crate) fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            at,
            started: Instant::now(),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.at
            + chrono::Duration::from_std(self.started.elapsed())
                .unwrap_or_else(|_| chrono::Duration::zero())
    }
}

impl Engine {
    /// Resume a suspended run whose continuation is due at `now`.
    ///
    /// Runs that are terminal or not yet due are returned unchanged. The run
    /// lock serializes this with cancellation and other workers.
    #[instrument(skip(self))]
    pub async fn advance_run(
        &self,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Result<WorkflowRun, EngineError> {
        let guard = self
            .tracker
            .lock_run(run_id, self.config.run_lock_ttl, self.config.lock_wait)
            .await?;
        let outcome = self.advance_locked(run_id, guard.as_ref(), now).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "failed to release run lock");
        }
        outcome
    }

    async fn advance_locked(
        &self,
        run_id: &str,
        guard: &dyn LockGuard,
        now: DateTime<Utc>,
    ) -> Result<WorkflowRun, EngineError> {
        let mut run = self.get_run(run_id).await?;
        if run.is_terminal() {
            self.tracker.clear_continuation(run_id).await?;
            return Ok(run);
        }
        if run.resume_at.is_some_and(|due| due > now) {
            debug!(resume_at = ?run.resume_at, "continuation not yet due");
            self.tracker.schedule_continuation(&run).await?;
            return Ok(run);
        }

        self.tracker.clear_continuation(run_id).await?;
        self.drive(&mut run, guard, PassClock::starting_at(now)).await?;
        Ok(run)
    }

    /// Interpret `run` under `guard`. A pass that errors leaves the run
    /// indexed for another attempt from its last persisted state.
    pub(crate) async fn drive(
        &self,
        run: &mut WorkflowRun,
        guard: &dyn LockGuard,
        clock: PassClock,
    ) -> Result<(), EngineError> {
        let outcome = self.interpret(run, guard, clock).await;
        if let Err(e) = &outcome {
            let retry_at = clock.now()
                + chrono::Duration::from_std(PASS_RETRY_DELAY)
                    .unwrap_or_else(|_| chrono::Duration::minutes(1));
            match self.tracker.schedule_continuation_at(&run.id, retry_at).await {
                Ok(()) => warn!(run.id = %run.id, error = %e, %retry_at, "run pass failed, retrying later"),
                Err(index_err) => error!(
                    run.id = %run.id,
                    error = %e,
                    index_error = %index_err,
                    "run pass failed and could not be rescheduled"
                ),
            }
        }
        outcome
    }

    /// Process actions from the cursor until the run suspends or ends.
    /// The run is persisted after every step.
    async fn interpret(
        &self,
        run: &mut WorkflowRun,
        guard: &dyn LockGuard,
        clock: PassClock,
    ) -> Result<(), EngineError> {
        while !run.is_terminal() {
            let now = clock.now();
            if let Some(reason) = self.tracker.cancel_requested(&run.id).await? {
                run.cancel(reason, now)?;
                self.metrics.increment_runs_cancelled();
                info!(run.id = %run.id, "run cancelled before its next action");
                break;
            }

            let Some(action) = run.current_action().cloned() else {
                run.complete(now)?;
                self.metrics.increment_runs_completed();
                info!(
                    run.id = %run.id,
                    workflow.id = %run.workflow_id,
                    actions = run.actions_executed.len(),
                    "run completed"
                );
                break;
            };

            let step = self.step(run, &action, guard, clock).await?;
            if !self.save(run).await? {
                return Ok(());
            }
            if matches!(step, Step::Stop) {
                if run.is_terminal() {
                    break;
                }
                return Ok(());
            }
            guard
                .extend(self.config.run_lock_ttl)
                .await
                .map_err(|e| EngineError::LockFailed(format!("run:{}: {e}", run.id)))?;
        }

        if !self.save(run).await? {
            return Ok(());
        }
        self.tracker.clear_continuation(&run.id).await?;
        self.tracker.clear_cancel_request(&run.id).await?;
        Ok(())
    }

    /// Persist `run`. Returns `false`, with `run` replaced by the stored
    /// state, when the run already finished elsewhere.
    async fn save(&self, run: &mut WorkflowRun) -> Result<bool, EngineError> {
        let Some(stored) = self.tracker.persist(run).await? else {
            return Ok(true);
        };
        warn!(run.id = %run.id, status = %stored.status, "run finished elsewhere, dropping this pass");
        self.tracker.clear_continuation(&run.id).await?;
        *run = stored;
        Ok(false)
    }

    #[instrument(
        skip_all,
        fields(run.id = %run.id, action.id = %action.id(), action.kind = %action.action_type())
    )]
    async fn step(
        &self,
        run: &mut WorkflowRun,
        action: &WorkflowAction,
        guard: &dyn LockGuard,
        clock: PassClock,
    ) -> Result<Step, EngineError> {
        let now = clock.now();
        // Conditions and timing are checked once, when the action is first
        // reached. A resumed run already passed them.
        if run.waiting_on != Some(action.order) {
            if !evaluate(&action.conditions, &run.evaluation_context()) {
                debug!("action conditions not met");
                self.log(run, ActionLogEntry::skipped(action, json!({"reason": "conditions_not_met"}), now))?;
                run.cursor += 1;
                return Ok(Step::Next);
            }

            let due = due_time(run, action, now);
            if due > now {
                run.resume_at = Some(due);
                run.waiting_on = Some(action.order);
                run.updated_at = now;
                self.tracker.schedule_continuation(run).await?;
                self.metrics.increment_continuations_scheduled();
                info!(resume_at = %due, "run suspended");
                return Ok(Step::Stop);
            }
        }
        run.resume_at = None;
        run.waiting_on = None;

        match &action.kind {
            ActionKind::Wait(wait) => {
                self.log(
                    run,
                    ActionLogEntry::success(action, json!({"waitedMinutes": wait.wait_minutes}), 0, now),
                )?;
                run.cursor += 1;
                Ok(Step::Next)
            }
            ActionKind::Branch(branch) => self.branch(run, action, branch, now),
            _ => self.execute_action(run, action, guard, clock).await,
        }
    }

    fn branch(
        &self,
        run: &mut WorkflowRun,
        action: &WorkflowAction,
        branch: &BranchConfig,
        now: DateTime<Utc>,
    ) -> Result<Step, EngineError> {
        if evaluate(&branch.branch_conditions, &run.evaluation_context()) {
            self.log(run, ActionLogEntry::success(action, json!({"branch": "then"}), 0, now))?;
            run.cursor += 1;
            return Ok(Step::Next);
        }

        match branch.else_branch {
            ElseBranch::Continue => {
                self.log(
                    run,
                    ActionLogEntry::success(action, json!({"branch": "else", "elseBranch": "continue"}), 0, now),
                )?;
                run.cursor += 1;
            }
            ElseBranch::Skip => {
                self.log(
                    run,
                    ActionLogEntry::success(action, json!({"branch": "else", "elseBranch": "skip"}), 0, now),
                )?;
                let end = run.actions.len();
                self.skip_range(run, run.cursor + 1, end, now)?;
                run.cursor = end;
            }
            ElseBranch::Jump(order) => {
                let Some(target) = run.position_of(order).filter(|pos| *pos > run.cursor) else {
                    let message = format!("{} jumps to missing or earlier action {order}", action.id());
                    self.log(run, ActionLogEntry::failed(action, "CONFIGURATION", &message, 0, now))?;
                    self.fail_run(run, action, message, "CONFIGURATION", 0, now)?;
                    return Ok(Step::Stop);
                };
                self.log(
                    run,
                    ActionLogEntry::success(action, json!({"branch": "else", "jumpTo": order}), 0, now),
                )?;
                self.skip_range(run, run.cursor + 1, target, now)?;
                run.cursor = target;
            }
        }
        Ok(Step::Next)
    }

    /// Log actions `from..to` as skipped by a branch.
    fn skip_range(
        &self,
        run: &mut WorkflowRun,
        from: usize,
        to: usize,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let bypassed: Vec<WorkflowAction> = run.actions[from.min(to)..to].to_vec();
        for skipped in &bypassed {
            self.log(run, ActionLogEntry::skipped(skipped, json!({"reason": "branch"}), now))?;
        }
        Ok(())
    }

    async fn execute_action(
        &self,
        run: &mut WorkflowRun,
        action: &WorkflowAction,
        guard: &dyn LockGuard,
        clock: PassClock,
    ) -> Result<Step, EngineError> {
        let context = run.evaluation_context();
        let recipients = match action.kind.recipients() {
            Some(config) => {
                let resolved = self.resolver.resolve(config, &context).await;
                exclude_dropped(resolved, &dropped_identities(run))
            }
            None => ResolvedRecipients::from_list(run.recipients.clone(), false),
        };
        if action.kind.needs_recipients() && recipients.is_empty() {
            debug!("no recipients for action");
            self.log(run, ActionLogEntry::skipped(action, json!({"recipients": 0}), clock.now()))?;
            run.cursor += 1;
            return Ok(Step::Next);
        }

        let action_type = action.action_type();
        let outcome = match self.handlers.get(action_type) {
            Some(handler) => {
                let invocation = ActionInvocation {
                    run_id: run.id.clone(),
                    workflow_id: run.workflow_id.clone(),
                    action_id: action.id(),
                    kind: action.kind.clone(),
                    recipients: recipients.clone(),
                    context,
                };
                let execution =
                    self.executor
                        .execute(&invocation, handler.as_ref(), RetryPolicy::for_action(action));
                keep_alive(guard, self.config.run_lock_ttl, execution).await
            }
            None => {
                let err = HandlerError::NotFound(format!("no handler registered for {action_type}"));
                HandlerOutcome::Failed(HandlerFailure::from_error(&err, 0))
            }
        };

        let now = clock.now();
        match outcome {
            HandlerOutcome::Succeeded { result, attempts } => {
                self.log(run, ActionLogEntry::success(action, result, attempts, now))?;
                if matches!(action.kind, ActionKind::SendEmail(_)) {
                    run.emails_sent += u32::try_from(recipients.count).unwrap_or(u32::MAX);
                }
                run.cursor += 1;
                Ok(Step::Next)
            }
            HandlerOutcome::Failed(failure) => {
                self.log(
                    run,
                    ActionLogEntry::failed(action, &failure.code, &failure.message, failure.attempts, now),
                )?;
                if run.continue_on_error {
                    warn!(code = %failure.code, "action failed, continuing");
                    run.cursor += 1;
                    return Ok(Step::Next);
                }
                self.fail_run(run, action, failure.message, &failure.code, failure.attempts, now)?;
                Ok(Step::Stop)
            }
        }
    }

    fn fail_run(
        &self,
        run: &mut WorkflowRun,
        action: &WorkflowAction,
        message: String,
        code: &str,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        run.fail(
            message,
            Some(json!({"actionId": action.id(), "code": code, "attempts": attempts})),
            now,
        )?;
        self.metrics.increment_runs_failed();
        error!(
            run.id = %run.id,
            workflow.id = %run.workflow_id,
            error = run.error_message.as_deref().unwrap_or_default(),
            "run failed"
        );
        Ok(())
    }

    fn log(&self, run: &mut WorkflowRun, entry: ActionLogEntry) -> Result<(), EngineError> {
        match entry.status {
            ActionLogStatus::Success => self.metrics.increment_actions_succeeded(),
            ActionLogStatus::Failed => self.metrics.increment_actions_failed(),
            ActionLogStatus::Skipped => self.metrics.increment_actions_skipped(),
        }
        run.record(entry)?;
        Ok(())
    }
}

/// When the action at the cursor may run: `delayMinutes` after the run
/// started, then for a `wait` another `waitMinutes` from that point.
fn due_time(run: &WorkflowRun, action: &WorkflowAction, now: DateTime<Utc>) -> DateTime<Utc> {
    let base = if action.delay_minutes > 0 {
        now.max(run.started_at + chrono::Duration::minutes(i64::from(action.delay_minutes)))
    } else {
        now
    };
    match &action.kind {
        ActionKind::Wait(wait) => base + chrono::Duration::minutes(i64::from(wait.wait_minutes)),
        _ => base,
    }
}

fn dropped(run: &WorkflowRun) -> Vec<DroppedRecipient> {
    run.context
        .get("droppedRecipients")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn dropped_identities(run: &WorkflowRun) -> HashSet<String> {
    dropped(run).iter().map(|d| d.recipient.identity()).collect()
}

/// Remove recipients that admission control excluded from this run.
fn exclude_dropped(resolved: ResolvedRecipients, excluded: &HashSet<String>) -> ResolvedRecipients {
    if excluded.is_empty() {
        return resolved;
    }
    let truncated = resolved.truncated;
    let kept = resolved
        .recipients
        .into_iter()
        .filter(|r| !excluded.contains(&r.identity()))
        .collect();
    ResolvedRecipients::from_list(kept, truncated)
}
