pub mod events;
pub mod health;
pub mod runs;
pub mod schemas;
pub mod webhooks;
pub mod workflows;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use cadence_engine::Engine;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The engine instance.
    pub engine: Arc<Engine>,
}

/// Build the axum router with all API routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        // Stimuli
        .route("/v1/events", post(events::submit_event))
        .route("/v1/events/catalog", get(events::catalog))
        .route("/v1/webhooks/{token}", post(webhooks::receive_webhook))
        // Workflows
        .route("/v1/workflows", get(workflows::list_workflows))
        .route("/v1/workflows/reload", post(workflows::reload_workflows))
        .route(
            "/v1/workflows/{workflow_id}/trigger",
            post(workflows::trigger_workflow),
        )
        .route(
            "/v1/workflows/{workflow_id}/preview",
            post(workflows::preview_workflow),
        )
        .route("/v1/workflows/{workflow_id}/runs", get(runs::list_runs))
        // Runs
        .route("/v1/runs/{run_id}", get(runs::get_run))
        .route("/v1/runs/{run_id}/cancel", post(runs::cancel_run))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
