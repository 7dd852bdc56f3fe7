use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::AppState;
use super::schemas::HealthResponse;

/// `GET /health` -- returns service status together with a metrics snapshot.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.engine.registry().snapshot();
    let body = HealthResponse {
        status: "ok".into(),
        workflows: snapshot.len(),
        registry_version: snapshot.version(),
        metrics: state.engine.metrics().snapshot(),
    };

    (StatusCode::OK, Json(body))
}
