//! End-to-end workflow scenarios: dispatch, admission, delays, branching
//! and retries through a full engine backed by the in-memory state store.

mod common;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::json;

use cadence_core::{
    ActionKind, ActionLogStatus, ActionType, BranchConfig, Condition, ConditionOperator,
    DenialReason, ElseBranch, RecipientConfig, RecipientSpec, RunStatus, ScheduleSpec, Trigger,
    Workflow, WorkflowAction, WorkflowSettings,
};
use cadence_engine::{Stimulus, WorkflowRegistry};
use cadence_provider::{DirectoryUser, InMemoryDirectory};

use common::{
    RecordingHandler, email_audience, email_to, harness, harness_with, harness_with_directory, task,
};

fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn statuses(run: &cadence_core::WorkflowRun) -> Vec<(String, ActionLogStatus)> {
    run.actions_executed
        .iter()
        .map(|e| (e.action_id.clone(), e.status))
        .collect()
}

#[tokio::test]
async fn onboarding_sequence_fires_on_day_zero_one_and_two() {
    let workflow = Workflow::new(
        "onboarding",
        "Application review sequence",
        Trigger::Event {
            event_name: "recruit.phase_changed".into(),
            conditions: vec![Condition::new(
                "new_phase",
                ConditionOperator::Equals,
                json!("Application Review"),
            )],
        },
    )
    .with_action(WorkflowAction::new(1, email_to("recruit@agency.test")))
    .with_action(WorkflowAction::new(2, email_to("recruit@agency.test")).with_delay(1440))
    .with_action(WorkflowAction::new(3, email_to("recruit@agency.test")).with_delay(2880));
    let h = harness(vec![workflow]);
    let t0 = monday_morning();

    let report = h
        .engine
        .dispatch_at(
            Stimulus::Event {
                name: "recruit.phase_changed".into(),
                payload: json!({"new_phase": "Application Review", "recruitId": "r-1"}),
            },
            t0,
        )
        .await
        .unwrap();
    assert_eq!(report.started.len(), 1);
    let summary = &report.started[0];
    assert_eq!(summary.status, RunStatus::Running);
    assert_eq!(summary.resume_at, Some(t0 + Duration::days(1)));
    h.email.assert_called(1);

    let run_id = summary.run_id.clone();
    assert_eq!(
        h.engine.tracker().due_runs(t0 + Duration::days(1)).await.unwrap(),
        vec![run_id.clone()]
    );

    // Too early: nothing happens.
    let early = h
        .engine
        .advance_run(&run_id, t0 + Duration::hours(23))
        .await
        .unwrap();
    assert_eq!(early.actions_executed.len(), 1);
    h.email.assert_called(1);

    let day_one = h
        .engine
        .advance_run(&run_id, t0 + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(day_one.status, RunStatus::Running);
    assert_eq!(day_one.resume_at, Some(t0 + Duration::days(2)));

    let done = h
        .engine
        .advance_run(&run_id, t0 + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    h.email.assert_called(3);

    let offsets: Vec<i64> = done
        .actions_executed
        .iter()
        .map(|e| (e.at - t0).num_minutes())
        .collect();
    assert_eq!(offsets, vec![0, 1440, 2880]);
    assert!(
        done.actions_executed
            .iter()
            .all(|e| e.status == ActionLogStatus::Success)
    );
    assert_eq!(done.emails_sent, 3);
    assert!(h.engine.tracker().due_runs(t0 + Duration::days(3)).await.unwrap().is_empty());
}

#[tokio::test]
async fn other_phases_do_not_start_the_sequence() {
    let workflow = Workflow::new(
        "onboarding",
        "Application review sequence",
        Trigger::Event {
            event_name: "recruit.phase_changed".into(),
            conditions: vec![Condition::new(
                "new_phase",
                ConditionOperator::Equals,
                json!("Application Review"),
            )],
        },
    )
    .with_action(WorkflowAction::new(1, email_to("recruit@agency.test")));
    let h = harness(vec![workflow]);

    let report = h
        .engine
        .submit_event("recruit.phase_changed", json!({"new_phase": "Licensing"}))
        .await
        .unwrap();
    assert_eq!(report.matched, 0);
    assert!(report.started.is_empty());
    h.email.assert_called(0);
}

fn expiring_policy_reminders() -> Workflow {
    let days = |n: i64| {
        vec![Condition::new(
            "days_until_expiration",
            ConditionOperator::Equals,
            json!(n),
        )]
    };
    Workflow::new(
        "renewals",
        "Policy expiration reminders",
        Trigger::Schedule(ScheduleSpec::daily("08:00")),
    )
    .with_conditions(vec![Condition::new(
        "days_until_expiration",
        ConditionOperator::In,
        json!([30, 15, 7, 1]),
    )])
    .with_action(WorkflowAction::new(1, email_to("agent@agency.test")).with_conditions(days(30)))
    .with_action(WorkflowAction::new(2, email_to("agent@agency.test")).with_conditions(days(15)))
    .with_action(WorkflowAction::new(3, email_to("agent@agency.test")).with_conditions(days(1)))
}

fn eight_am_tick(payload: serde_json::Value) -> (Stimulus, DateTime<Utc>) {
    let at = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 30).unwrap();
    (Stimulus::Tick { at, payload }, at)
}

#[tokio::test]
async fn daily_schedule_runs_only_the_matching_reminder() {
    let h = harness(vec![expiring_policy_reminders()]);
    let (tick, at) = eight_am_tick(json!({"days_until_expiration": 15}));

    let report = h.engine.dispatch_at(tick, at).await.unwrap();
    assert_eq!(report.started.len(), 1);
    assert_eq!(report.started[0].status, RunStatus::Completed);

    let run = h.engine.get_run(&report.started[0].run_id).await.unwrap();
    assert_eq!(
        statuses(&run),
        vec![
            ("action-1".to_owned(), ActionLogStatus::Skipped),
            ("action-2".to_owned(), ActionLogStatus::Success),
            ("action-3".to_owned(), ActionLogStatus::Skipped),
        ]
    );
    assert_eq!(h.email.action_ids(), vec!["action-2"]);
    assert_eq!(run.context["scheduledFor"], json!("2026-03-02T08:00:00+00:00"));
}

#[tokio::test]
async fn schedule_outside_the_reminder_days_is_not_met() {
    let h = harness(vec![expiring_policy_reminders()]);
    let (tick, at) = eight_am_tick(json!({"days_until_expiration": 14}));

    let report = h.engine.dispatch_at(tick, at).await.unwrap();
    assert_eq!(report.not_met, vec!["renewals"]);
    h.email.assert_called(0);
}

fn bundled_workflow(id: &str) -> Workflow {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../workflows");
    let registry = WorkflowRegistry::default();
    registry.load_directory(&dir).unwrap();
    let workflow = registry.snapshot().get(id).cloned().unwrap();
    (*workflow).clone()
}

#[tokio::test]
async fn license_expiry_schedule_fans_out_per_expiring_agent() {
    let day = |m: u32, d: u32| NaiveDate::from_ymd_opt(2026, m, d).unwrap();
    let directory = InMemoryDirectory::new()
        .with_user(DirectoryUser::new("admin", "owner@agency.test").admin())
        .with_user(DirectoryUser::new("a1", "a1@agency.test").license_expires(day(3, 7)))
        .with_user(DirectoryUser::new("a2", "a2@agency.test").license_expires(day(3, 22)))
        .with_user(DirectoryUser::new("a3", "a3@agency.test").license_expires(day(4, 1)))
        .with_user(DirectoryUser::new("a4", "a4@agency.test").license_expires(day(4, 16)));
    let h = harness_with_directory(vec![bundled_workflow("license-expiry")], directory);

    // 08:00 in Chicago.
    let at = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 30).unwrap();
    let report = h.engine.tick(at).await.unwrap();
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.matched, 3, "a4 is outside the 30-day window");
    assert_eq!(report.started.len(), 2);
    assert_eq!(report.not_met, vec!["license-expiry"], "a3 expires in exactly 30 days");

    let emailed: Vec<Vec<String>> = h
        .email
        .invocations()
        .iter()
        .map(|i| i.recipients.user_ids.clone())
        .collect();
    assert_eq!(emailed, vec![vec!["a1".to_owned()], vec!["a2".to_owned()]]);
    h.task.assert_called(1);

    let run = h.engine.get_run(&report.started[0].run_id).await.unwrap();
    assert_eq!(run.context["days_until_expiration"], json!(5));
    assert_eq!(run.context["license_expiration"], json!("2026-03-07"));

    let again = h.engine.tick(at).await.unwrap();
    assert!(again.started.is_empty(), "each record fires once per fire time");
    h.email.assert_called(2);
}

#[tokio::test]
async fn repeated_tick_dispatches_a_fire_time_once() {
    let h = harness(vec![expiring_policy_reminders()]);
    let (tick, at) = eight_am_tick(json!({"days_until_expiration": 15}));

    let first = h.engine.dispatch_at(tick.clone(), at).await.unwrap();
    let again = h
        .engine
        .dispatch_at(tick, at + Duration::seconds(10))
        .await
        .unwrap();
    assert_eq!(first.started.len(), 1);
    assert!(again.started.is_empty());
    assert_eq!(again.matched, 0);
    h.email.assert_called(1);
}

fn capped_announcement() -> Workflow {
    Workflow::new("announce", "Announcement", Trigger::Manual)
        .with_settings(WorkflowSettings {
            max_runs_per_recipient: Some(3),
            ..WorkflowSettings::default()
        })
        .with_audience(RecipientConfig::new(RecipientSpec::DynamicField {
            field_path: "emails".into(),
        }))
        .with_action(WorkflowAction::new(1, email_audience()))
}

#[tokio::test]
async fn recipient_cap_excludes_a_recipient_on_the_fourth_run() {
    let h = harness(vec![capped_announcement()]);
    let only_a = json!({"emails": ["a@agency.test"]});

    for _ in 0..3 {
        let report = h
            .engine
            .run_manual("announce", only_a.clone(), "ops")
            .await
            .unwrap();
        assert_eq!(report.started.len(), 1);
    }

    // Sole candidate is capped: no run.
    let fourth = h
        .engine
        .run_manual("announce", only_a, "ops")
        .await
        .unwrap();
    assert!(fourth.started.is_empty());
    assert_eq!(fourth.denied.len(), 1);
    assert_eq!(fourth.denied[0].reason, DenialReason::NoRecipients);
    assert_eq!(
        fourth.denied[0].dropped[0].reason,
        DenialReason::RecipientLimit { limit: 3 }
    );
    assert_eq!(h.engine.list_runs("announce").await.unwrap().len(), 3);

    // With another candidate the run starts without the capped one.
    let mixed = h
        .engine
        .run_manual(
            "announce",
            json!({"emails": ["a@agency.test", "b@agency.test"]}),
            "ops",
        )
        .await
        .unwrap();
    assert_eq!(mixed.started.len(), 1);
    assert_eq!(mixed.started[0].recipients, 1);
    assert_eq!(mixed.started[0].dropped_recipients, 1);

    let last = h.email.invocations().pop().unwrap();
    assert_eq!(last.recipients.emails, vec!["b@agency.test"]);
}

#[tokio::test]
async fn always_failing_action_is_attempted_three_times_then_fails_the_run() {
    let workflow = Workflow::new("flaky", "Flaky", Trigger::Manual).with_action(
        WorkflowAction::new(1, email_to("agent@agency.test")).with_retries(true, 2),
    );
    let h = harness_with(vec![workflow], RecordingHandler::failing(ActionType::SendEmail));

    let report = h.engine.run_manual("flaky", json!({}), "ops").await.unwrap();
    assert_eq!(report.started[0].status, RunStatus::Failed);
    h.email.assert_called(3);

    let run = h.engine.get_run(&report.started[0].run_id).await.unwrap();
    let entry = &run.actions_executed[0];
    assert_eq!(entry.status, ActionLogStatus::Failed);
    assert_eq!(entry.attempts, 3);
    assert_eq!(entry.error_code.as_deref(), Some("CONNECTION"));
    assert_eq!(run.actions_failed, 1);
    assert_eq!(run.error_details.as_ref().unwrap()["actionId"], "action-1");
    assert!(run.error_message.as_deref().unwrap().contains("upstream unavailable"));
    assert_eq!(h.engine.metrics().snapshot().runs_failed, 1);
}

#[tokio::test]
async fn continue_on_error_proceeds_past_a_failed_action() {
    let workflow = Workflow::new("lenient", "Lenient", Trigger::Manual)
        .with_settings(WorkflowSettings {
            continue_on_error: true,
            ..WorkflowSettings::default()
        })
        .with_action(WorkflowAction::new(1, email_to("agent@agency.test")).with_retries(false, 0))
        .with_action(WorkflowAction::new(2, task("Follow up")));
    let h = harness_with(vec![workflow], RecordingHandler::failing(ActionType::SendEmail));

    let report = h.engine.run_manual("lenient", json!({}), "ops").await.unwrap();
    let run = h.engine.get_run(&report.started[0].run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(
        statuses(&run),
        vec![
            ("action-1".to_owned(), ActionLogStatus::Failed),
            ("action-2".to_owned(), ActionLogStatus::Success),
        ]
    );
    h.task.assert_called(1);
}

fn branching(else_branch: ElseBranch) -> Workflow {
    Workflow::new("route", "Route by license", Trigger::Manual)
        .with_action(WorkflowAction::new(
            1,
            ActionKind::Branch(BranchConfig {
                branch_conditions: vec![Condition::new(
                    "licensed",
                    ConditionOperator::Equals,
                    json!(true),
                )],
                else_branch,
            }),
        ))
        .with_action(WorkflowAction::new(2, email_to("licensed@agency.test")))
        .with_action(WorkflowAction::new(3, task("Licensed follow up")))
        .with_action(WorkflowAction::new(4, email_to("unlicensed@agency.test")))
}

#[tokio::test]
async fn branch_then_path_runs_in_order() {
    let h = harness(vec![branching(ElseBranch::Jump(4))]);
    let report = h
        .engine
        .run_manual("route", json!({"licensed": true}), "ops")
        .await
        .unwrap();
    let run = h.engine.get_run(&report.started[0].run_id).await.unwrap();
    assert_eq!(run.actions_executed[0].result, Some(json!({"branch": "then"})));
    assert_eq!(h.email.action_ids(), vec!["action-2", "action-4"]);
    h.task.assert_called(1);
}

#[tokio::test]
async fn branch_jump_skips_the_bypassed_actions() {
    let h = harness(vec![branching(ElseBranch::Jump(4))]);
    let report = h
        .engine
        .run_manual("route", json!({"licensed": false}), "ops")
        .await
        .unwrap();
    let run = h.engine.get_run(&report.started[0].run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(
        statuses(&run),
        vec![
            ("action-1".to_owned(), ActionLogStatus::Success),
            ("action-2".to_owned(), ActionLogStatus::Skipped),
            ("action-3".to_owned(), ActionLogStatus::Skipped),
            ("action-4".to_owned(), ActionLogStatus::Success),
        ]
    );
    assert_eq!(h.email.action_ids(), vec!["action-4"]);
    h.task.assert_called(0);
}

#[tokio::test]
async fn branch_skip_ends_the_run() {
    let h = harness(vec![branching(ElseBranch::Skip)]);
    let report = h
        .engine
        .run_manual("route", json!({"licensed": false}), "ops")
        .await
        .unwrap();
    let run = h.engine.get_run(&report.started[0].run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.actions_executed.len(), 4);
    assert!(
        run.actions_executed[1..]
            .iter()
            .all(|e| e.status == ActionLogStatus::Skipped)
    );
    h.email.assert_called(0);
}

#[tokio::test]
async fn action_results_feed_later_conditions() {
    let workflow = Workflow::new("chain", "Chain", Trigger::Manual)
        .with_action(WorkflowAction::new(1, email_to("agent@agency.test")))
        .with_action(
            WorkflowAction::new(2, task("Confirm delivery")).with_conditions(vec![Condition::new(
                "results.action-1.delivered",
                ConditionOperator::Equals,
                json!(1),
            )]),
        );
    let h = harness(vec![workflow]);
    h.engine.run_manual("chain", json!({}), "ops").await.unwrap();
    h.task.assert_called(1);
}

#[tokio::test]
async fn action_without_recipients_is_skipped() {
    let workflow = Workflow::new("nobody", "Nobody", Trigger::Manual).with_action(
        WorkflowAction::new(
            1,
            ActionKind::SendEmail(cadence_core::SendEmailConfig {
                template_id: "tpl".into(),
                recipients: Some(RecipientConfig::new(RecipientSpec::EventUser)),
                ..Default::default()
            }),
        ),
    );
    let h = harness(vec![workflow]);
    let report = h.engine.run_manual("nobody", json!({}), "ops").await.unwrap();
    let run = h.engine.get_run(&report.started[0].run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.actions_executed[0].status, ActionLogStatus::Skipped);
    assert_eq!(run.actions_executed[0].result, Some(json!({"recipients": 0})));
    h.email.assert_called(0);
}

#[tokio::test]
async fn missing_handler_fails_the_action_without_attempts() {
    let workflow = Workflow::new("assign", "Assign", Trigger::Manual).with_action(
        WorkflowAction::new(
            1,
            ActionKind::AssignUser(cadence_core::AssignUserConfig {
                entity_type: "lead".into(),
                ..Default::default()
            }),
        ),
    );
    let h = harness(vec![workflow]);
    let report = h.engine.run_manual("assign", json!({}), "ops").await.unwrap();
    let run = h.engine.get_run(&report.started[0].run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.actions_executed[0].error_code.as_deref(), Some("NOT_FOUND"));
    assert_eq!(run.actions_executed[0].attempts, 0);
}

#[tokio::test]
async fn daily_limit_stops_the_next_trigger() {
    let workflow = Workflow::new("daily", "Daily", Trigger::event("lead.created"))
        .with_settings(WorkflowSettings {
            max_runs_per_day: 2,
            ..WorkflowSettings::default()
        })
        .with_action(WorkflowAction::new(1, task("Call lead")));
    let h = harness(vec![workflow]);

    for _ in 0..2 {
        let report = h.engine.submit_event("lead.created", json!({})).await.unwrap();
        assert_eq!(report.started.len(), 1);
    }
    let third = h.engine.submit_event("lead.created", json!({})).await.unwrap();
    assert_eq!(
        third.denied[0].reason,
        DenialReason::DailyLimit { limit: 2 }
    );
    h.task.assert_called(2);
}

#[tokio::test]
async fn matched_workflows_run_in_priority_order() {
    let low = Workflow::new("low", "Low", Trigger::event("policy.created"))
        .with_settings(WorkflowSettings {
            priority: 10,
            ..WorkflowSettings::default()
        })
        .with_action(WorkflowAction::new(1, task("low")));
    let high = Workflow::new("high", "High", Trigger::event("policy.created"))
        .with_settings(WorkflowSettings {
            priority: 90,
            ..WorkflowSettings::default()
        })
        .with_action(WorkflowAction::new(1, task("high")));
    let h = harness(vec![low, high]);

    let report = h.engine.submit_event("policy.created", json!({})).await.unwrap();
    let order: Vec<&str> = report.started.iter().map(|s| s.workflow_id.as_str()).collect();
    assert_eq!(order, vec!["high", "low"]);
    let titles: Vec<String> = h
        .task
        .invocations()
        .iter()
        .map(|i| match &i.kind {
            ActionKind::CreateTask(c) => c.title.clone(),
            _ => String::new(),
        })
        .collect();
    assert_eq!(titles, vec!["high", "low"]);
}
