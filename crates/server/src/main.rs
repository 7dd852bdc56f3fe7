use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};

use cadence_engine::{
    BackgroundProcessorBuilder, Engine, EngineBuilder, WorkflowRegistry, WorkflowWatcher,
};
use cadence_server::api::{self, AppState};
use cadence_server::config::CadenceConfig;
use cadence_server::handler_factory::{create_directory, create_handlers};
use cadence_server::state_factory::create_state;

/// Cadence workflow engine HTTP server.
#[derive(Parser, Debug)]
#[command(name = "cadence-server", about = "Standalone HTTP server for Cadence")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "cadence.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = Path::new(&cli.config);
    if !config_path.exists() {
        info!(path = %cli.config, "config file not found, using defaults");
    }
    let config = CadenceConfig::load(config_path)?;

    let (store, lock) = create_state(&config.state)?;
    info!(backend = %config.state.backend, "state backend initialized");

    // Load workflow definitions.
    let registry = match &config.workflows.directory {
        Some(dir) => {
            let registry = Arc::new(WorkflowRegistry::default().with_source_dir(dir));
            let count = registry.reload()?;
            info!(count, directory = %dir, "workflows loaded");
            registry
        }
        None => {
            warn!("no [workflows] directory configured, starting with an empty registry");
            Arc::new(WorkflowRegistry::default())
        }
    };

    let engine = EngineBuilder::new()
        .config(config.engine.to_engine_config())
        .state(store)
        .lock(lock)
        .registry(Arc::clone(&registry))
        .handlers(create_handlers(&config.handlers)?)
        .directory(Arc::new(create_directory(&config.directory)?))
        .executor_config(config.executor.to_executor_config())
        .build()?;
    let engine = Arc::new(engine);

    // Reload definitions on change.
    let watcher_handle = match (&config.workflows.directory, config.workflows.watch) {
        (Some(dir), true) => Some(WorkflowWatcher::new(Arc::clone(&registry), dir).spawn()),
        (None, true) => {
            warn!("[workflows] watch is set without a directory, ignoring");
            None
        }
        _ => None,
    };

    // Spawn the background processor for continuations and schedule ticks.
    let background_shutdown_tx = if config.background.enabled {
        let (continuation_tx, mut continuation_rx) = tokio::sync::mpsc::channel(100);
        let (tick_tx, mut tick_rx) = tokio::sync::mpsc::channel(16);

        let (mut processor, shutdown_tx) = BackgroundProcessorBuilder::new()
            .config(config.background.to_background_config())
            .tracker(engine.tracker().clone())
            .continuation_channel(continuation_tx)
            .schedule_tick_channel(tick_tx)
            .build()
            .map_err(|e| format!("failed to build background processor: {e}"))?;

        tokio::spawn(async move {
            processor.run().await;
        });

        // Each due run advances on its own task so a slow handler does not
        // hold up the others.
        let continuation_engine = Arc::clone(&engine);
        tokio::spawn(async move {
            while let Some(event) = continuation_rx.recv().await {
                let engine = Arc::clone(&continuation_engine);
                tokio::spawn(async move {
                    resume_run(&engine, &event.run_id).await;
                });
            }
        });

        let tick_engine = Arc::clone(&engine);
        tokio::spawn(async move {
            while let Some(event) = tick_rx.recv().await {
                match tick_engine.tick(event.at).await {
                    Ok(report) if report.matched > 0 => info!(
                        at = %event.at,
                        matched = report.matched,
                        started = report.started.len(),
                        "schedule tick dispatched"
                    ),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, at = %event.at, "schedule tick failed"),
                }
            }
        });

        info!("background processor started");
        Some(shutdown_tx)
    } else {
        info!("background processing disabled");
        None
    };

    let app = api::router(AppState {
        engine: Arc::clone(&engine),
    });

    let host = cli.host.unwrap_or(config.server.host);
    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "cadence-server listening");

    // Serve with graceful shutdown on SIGINT / SIGTERM.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = watcher_handle {
        handle.abort();
    }

    if let Some(tx) = background_shutdown_tx {
        let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
        if tokio::time::timeout(shutdown_timeout, tx.send(()))
            .await
            .is_err()
        {
            warn!(
                timeout_secs = config.server.shutdown_timeout_seconds,
                "shutdown timeout exceeded waiting for the background processor"
            );
        }
    }

    info!("cadence-server shut down");
    Ok(())
}

async fn resume_run(engine: &Engine, run_id: &str) {
    match engine.advance_run(run_id, Utc::now()).await {
        Ok(run) => info!(run.id = %run_id, status = ?run.status, "run advanced"),
        Err(e) => warn!(run.id = %run_id, error = %e, "failed to advance run"),
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
