use std::time::Duration;

use cadence_core::ActionType;
use cadence_executor::RetryStrategy;

use super::*;

#[test]
fn empty_file_yields_defaults() {
    let config = CadenceConfig::parse("").unwrap();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.shutdown_timeout_seconds, 30);
    assert_eq!(config.state.backend, "memory");
    assert!(config.workflows.directory.is_none());
    assert!(!config.workflows.watch);
    assert!(config.directory.seed_path.is_none());
    assert_eq!(config.engine.namespace, "cadence");
    assert!(config.handlers.webhook);
    assert!(config.handlers.log.contains(&ActionType::SendEmail));
    assert!(!config.handlers.log.contains(&ActionType::Wait));
    assert!(config.background.enabled);
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = CadenceConfig::load(&dir.path().join("cadence.toml")).unwrap();
    assert_eq!(config.server.port, 8080);
}

#[test]
fn engine_section_converts() {
    let toml = r#"
        [engine]
        namespace = "agency-7"
        schedule_window_seconds = 30
        lock_wait_ms = 250
    "#;

    let config = CadenceConfig::parse(toml).unwrap();
    let engine = config.engine.to_engine_config();
    assert_eq!(engine.namespace, "agency-7");
    assert_eq!(engine.schedule_window, Duration::from_secs(30));
    assert_eq!(engine.run_lock_ttl, Duration::from_secs(60));
    assert_eq!(engine.lock_wait, Duration::from_millis(250));
}

#[test]
fn executor_retry_strategy_from_toml() {
    let toml = r#"
        [executor]
        handler_timeout_seconds = 5
        max_concurrent = 4
        retry = { strategy = "linear", delay_ms = 500, max_ms = 5000 }
    "#;

    let config = CadenceConfig::parse(toml).unwrap();
    let executor = config.executor.to_executor_config();
    assert_eq!(executor.handler_timeout, Duration::from_secs(5));
    assert_eq!(executor.max_concurrent, 4);
    assert_eq!(
        executor.retry_strategy,
        RetryStrategy::Linear {
            delay_ms: 500,
            max_ms: 5000
        }
    );
}

#[test]
fn handlers_section_overrides_defaults() {
    let toml = r#"
        [handlers]
        log = ["send_email", "create_task"]
        webhook = false
    "#;

    let config = CadenceConfig::parse(toml).unwrap();
    assert_eq!(
        config.handlers.log,
        vec![ActionType::SendEmail, ActionType::CreateTask]
    );
    assert!(!config.handlers.webhook);
    assert_eq!(config.handlers.webhook_timeout_seconds, 10);
}

#[test]
fn background_intervals_are_clamped() {
    let toml = r#"
        [background]
        continuation_poll_interval_seconds = 0
        enable_schedule_ticks = false
    "#;

    let config = CadenceConfig::parse(toml).unwrap();
    let background = config.background.to_background_config();
    assert_eq!(background.continuation_poll_interval, Duration::from_secs(1));
    assert_eq!(background.schedule_tick_interval, Duration::from_secs(60));
    assert!(!background.enable_schedule_ticks);
}

#[test]
fn workflows_section() {
    let toml = r#"
        [workflows]
        directory = "workflows"
        watch = true

        [directory]
        seed_path = "seed/directory.json"
    "#;

    let config = CadenceConfig::parse(toml).unwrap();
    assert_eq!(config.workflows.directory.as_deref(), Some("workflows"));
    assert!(config.workflows.watch);
    assert_eq!(
        config.directory.seed_path.as_deref(),
        Some("seed/directory.json")
    );
}

#[test]
fn unknown_enum_value_is_a_config_error() {
    let err = CadenceConfig::parse("[handlers]\nlog = [\"send_fax\"]\n").unwrap_err();
    assert!(matches!(err, ServerError::Config(_)));
}
