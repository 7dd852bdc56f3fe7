use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::IntoResponse;
use tracing::info;

use cadence_engine::DispatchReport;

use crate::error::ServerError;

use super::AppState;
use super::schemas::SubmitEventRequest;

/// `POST /v1/events` -- submit a domain event and dispatch it to every
/// matching workflow.
pub async fn submit_event(
    State(state): State<AppState>,
    body: Result<Json<SubmitEventRequest>, JsonRejection>,
) -> Result<Json<DispatchReport>, ServerError> {
    let Json(request) = body.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    if request.event_name.trim().is_empty() {
        return Err(ServerError::BadRequest("eventName must not be empty".into()));
    }

    let report = state
        .engine
        .submit_event(request.event_name.as_str(), request.payload)
        .await?;
    info!(
        event = %request.event_name,
        matched = report.matched,
        started = report.started.len(),
        "event dispatched"
    );
    Ok(Json(report))
}

/// `GET /v1/events/catalog` -- the event types workflows can subscribe to.
pub async fn catalog(State(state): State<AppState>) -> impl IntoResponse {
    let events: Vec<_> = state
        .engine
        .catalog()
        .list()
        .into_iter()
        .cloned()
        .collect();
    Json(events)
}
