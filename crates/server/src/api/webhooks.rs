use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;

use cadence_engine::DispatchReport;
use cadence_provider::SIGNATURE_HEADER;

use crate::error::ServerError;

use super::AppState;

/// `POST /v1/webhooks/{token}` -- inbound webhook call.
///
/// The raw body is verified against the `X-Cadence-Signature` header when
/// the workflow behind `token` has a secret.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DispatchReport>, ServerError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .map(|value| {
            value
                .to_str()
                .map(str::to_owned)
                .map_err(|_| ServerError::BadRequest("malformed signature header".into()))
        })
        .transpose()?;

    let report = state
        .engine
        .submit_webhook(token, body.to_vec(), signature)
        .await?;
    Ok(Json(report))
}
