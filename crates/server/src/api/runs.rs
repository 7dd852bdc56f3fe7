use axum::Json;
use axum::extract::{Path, State};

use cadence_core::WorkflowRun;

use crate::error::ServerError;

use super::AppState;
use super::schemas::CancelRequest;

/// `GET /v1/workflows/{workflow_id}/runs` -- runs of one workflow, newest
/// first.
pub async fn list_runs(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Vec<WorkflowRun>>, ServerError> {
    Ok(Json(state.engine.list_runs(&workflow_id).await?))
}

/// `GET /v1/runs/{run_id}`
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<WorkflowRun>, ServerError> {
    Ok(Json(state.engine.get_run(&run_id).await?))
}

/// `POST /v1/runs/{run_id}/cancel` -- cancel a run. Cancelling a finished
/// run returns it unchanged.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<WorkflowRun>, ServerError> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(state.engine.cancel_run(&run_id, reason).await?))
}
