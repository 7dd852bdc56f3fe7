use axum::Json;
use axum::extract::{Path, State};
use tracing::info;

use cadence_engine::{DispatchReport, RunPreview};

use crate::error::ServerError;

use super::AppState;
use super::schemas::{
    PreviewRequest, ReloadResponse, TriggerRequest, WorkflowListResponse, WorkflowSummary,
};

/// `GET /v1/workflows` -- the live registry, highest priority first.
pub async fn list_workflows(State(state): State<AppState>) -> Json<WorkflowListResponse> {
    let snapshot = state.engine.registry().snapshot();
    let mut workflows: Vec<WorkflowSummary> = snapshot
        .iter()
        .map(|w| WorkflowSummary::from(w.as_ref()))
        .collect();
    workflows.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

    Json(WorkflowListResponse {
        version: snapshot.version(),
        loaded_at: snapshot.loaded_at(),
        workflows,
    })
}

/// `POST /v1/workflows/reload` -- re-read definitions from the configured
/// directory. A failed load leaves the previous definitions in place.
pub async fn reload_workflows(
    State(state): State<AppState>,
) -> Result<Json<ReloadResponse>, ServerError> {
    let loaded = state.engine.reload()?;
    let version = state.engine.registry().snapshot().version();
    info!(loaded, version, "workflows reloaded via API");
    Ok(Json(ReloadResponse { loaded, version }))
}

/// `POST /v1/workflows/{workflow_id}/trigger` -- start a run by hand.
pub async fn trigger_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    body: Option<Json<TriggerRequest>>,
) -> Result<Json<DispatchReport>, ServerError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let report = state
        .engine
        .run_manual(workflow_id, request.payload, request.triggered_by)
        .await?;
    Ok(Json(report))
}

/// `POST /v1/workflows/{workflow_id}/preview` -- evaluate a workflow
/// against a sample payload without running anything.
pub async fn preview_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    body: Option<Json<PreviewRequest>>,
) -> Result<Json<RunPreview>, ServerError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let preview = state.engine.preview(&workflow_id, request.payload).await?;
    Ok(Json(preview))
}
