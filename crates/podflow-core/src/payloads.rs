use crate::model::{Anchor, Connection, TriggerMode};
use serde::{Deserialize, Deserializer, Serialize};

// Tracked operation payloads

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloneProgressPayload {
    pub request_id: String,
    #[serde(deserialize_with = "deserialize_progress")]
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub repo_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloneResultPayload {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub repository_id: Option<String>,
    #[serde(default)]
    pub repo_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PullProgressPayload {
    pub request_id: String,
    #[serde(deserialize_with = "deserialize_progress")]
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub repository_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PullResultPayload {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub repository_id: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutProgressPayload {
    pub request_id: String,
    #[serde(deserialize_with = "deserialize_progress")]
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub repository_id: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResultPayload {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub repository_id: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    /// `switched`, `fetched` or `created`, when the backend reports it.
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloneRequest {
    pub request_id: String,
    pub repository_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub request_id: String,
    pub repository_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub request_id: String,
    pub repository_id: String,
    pub branch_name: String,
    #[serde(default)]
    pub force: bool,
}

// Workflow lifecycle payloads

/// Shared by `auto-triggered`, `direct-triggered` and `direct-waiting`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTriggerPayload {
    pub connection_id: String,
    #[serde(default)]
    pub source_pod_id: Option<String>,
    #[serde(default)]
    pub target_pod_id: Option<String>,
}

/// Shared by `queued` and `queue-processed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowQueuePayload {
    pub connection_id: String,
    #[serde(default)]
    pub target_pod_id: Option<String>,
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub queue_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCompletePayload {
    pub connection_id: String,
    #[serde(default)]
    pub target_pod_id: Option<String>,
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    #[serde(default)]
    pub success: Option<bool>,
}

/// Shared by `ai-decide-pending` and `ai-decide-clear`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AiDecideBatchPayload {
    #[serde(default)]
    pub connection_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AiDecideResultPayload {
    pub connection_id: String,
    pub should_trigger: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AiDecideErrorPayload {
    pub connection_id: String,
    #[serde(default)]
    pub error: String,
}

// Graph payloads

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodDeletedPayload {
    pub pod_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionRequest {
    pub canvas_id: String,
    pub source_pod_id: Option<String>,
    pub source_anchor: Anchor,
    pub target_pod_id: String,
    pub target_anchor: Anchor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_mode: Option<TriggerMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConnectionRequest {
    pub canvas_id: String,
    pub connection_id: String,
    pub trigger_mode: TriggerMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteConnectionRequest {
    pub canvas_id: String,
    pub connection_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListConnectionsRequest {
    pub canvas_id: String,
}

/// Body of `connection:created` and `connection:updated`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPayload {
    pub connection: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDeletedPayload {
    pub connection_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionListPayload {
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// Accepts integer, float or numeric string progress and clamps it to 0..=100.
fn deserialize_progress<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    let raw = match val {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("invalid progress number"))?,
        serde_json::Value::String(s) => s
            .trim()
            .trim_end_matches('%')
            .parse::<f64>()
            .map_err(serde::de::Error::custom)?,
        _ => return Err(serde::de::Error::custom("expected number or string for progress")),
    };
    if raw.is_nan() {
        return Err(serde::de::Error::custom("progress is NaN"));
    }
    Ok(raw.clamp(0.0, 100.0).round() as u8)
}
