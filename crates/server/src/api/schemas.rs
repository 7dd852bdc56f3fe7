use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cadence_core::{Workflow, WorkflowStatus};
use cadence_engine::MetricsSnapshot;

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    /// Number of workflows in the live registry.
    pub workflows: usize,
    pub registry_version: u64,
    pub metrics: MetricsSnapshot,
}

/// Request body for `POST /v1/events`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEventRequest {
    pub event_name: String,
    #[serde(default = "empty_object")]
    pub payload: Value,
}

/// Request body for `POST /v1/workflows/{id}/trigger`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    #[serde(default = "empty_object")]
    pub payload: Value,
    /// Who started the run; recorded as `triggeredBy` in the run context.
    #[serde(default = "default_triggered_by")]
    pub triggered_by: String,
}

impl Default for TriggerRequest {
    fn default() -> Self {
        Self {
            payload: empty_object(),
            triggered_by: default_triggered_by(),
        }
    }
}

/// Request body for `POST /v1/workflows/{id}/preview`.
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    #[serde(default = "empty_object")]
    pub payload: Value,
}

impl Default for PreviewRequest {
    fn default() -> Self {
        Self {
            payload: empty_object(),
        }
    }
}

/// Request body for `POST /v1/runs/{id}/cancel`.
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// One entry of `GET /v1/workflows`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub version: u32,
    /// `event`, `schedule`, `webhook` or `manual`.
    pub trigger: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    pub priority: u8,
    pub actions: usize,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id.clone(),
            name: workflow.name.clone(),
            status: workflow.status,
            version: workflow.version,
            trigger: workflow.trigger.kind(),
            event_name: workflow.trigger.event_name().map(str::to_owned),
            priority: workflow.settings.priority,
            actions: workflow.actions.len(),
        }
    }
}

/// Response body for `GET /v1/workflows`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowListResponse {
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
    pub workflows: Vec<WorkflowSummary>,
}

/// Response body for `POST /v1/workflows/reload`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadResponse {
    pub loaded: usize,
    pub version: u64,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_triggered_by() -> String {
    "api".to_owned()
}
