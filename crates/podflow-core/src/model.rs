use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    Top,
    Bottom,
    Left,
    Right,
}

impl Anchor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Anchor::Top => "top",
            Anchor::Bottom => "bottom",
            Anchor::Left => "left",
            Anchor::Right => "right",
        }
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy deciding when a connection feeds its target pod.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerMode {
    Auto,
    Direct,
    AiDecide,
}

impl Default for TriggerMode {
    fn default() -> Self {
        Self::Auto
    }
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Auto => "auto",
            TriggerMode::Direct => "direct",
            TriggerMode::AiDecide => "ai-decide",
        }
    }

    /// Auto and ai-decide edges fire together with every sibling that shares
    /// their target pod; direct edges fire on their own.
    pub fn fans_out_by_target(&self) -> bool {
        matches!(self, TriggerMode::Auto | TriggerMode::AiDecide)
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "auto" => Ok(TriggerMode::Auto),
            "direct" => Ok(TriggerMode::Direct),
            "ai-decide" | "ai_decide" | "aidecide" => Ok(TriggerMode::AiDecide),
            other => Err(format!("Unknown trigger mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    Idle,
    Active,
    Waiting,
    Queued,
    AiDeciding,
    AiApproved,
    AiRejected,
    AiError,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Waiting => "waiting",
            ConnectionStatus::Queued => "queued",
            ConnectionStatus::AiDeciding => "ai-deciding",
            ConnectionStatus::AiApproved => "ai-approved",
            ConnectionStatus::AiRejected => "ai-rejected",
            ConnectionStatus::AiError => "ai-error",
        }
    }

    /// An approved edge may fire even though its literal status is not idle.
    pub fn can_activate(&self) -> bool {
        matches!(self, ConnectionStatus::Idle | ConnectionStatus::AiApproved)
    }

    pub fn keeps_decide_reason(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::AiRejected | ConnectionStatus::AiError | ConnectionStatus::AiApproved
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "idle" => Ok(ConnectionStatus::Idle),
            "active" => Ok(ConnectionStatus::Active),
            "waiting" => Ok(ConnectionStatus::Waiting),
            "queued" => Ok(ConnectionStatus::Queued),
            "ai-deciding" => Ok(ConnectionStatus::AiDeciding),
            "ai-approved" => Ok(ConnectionStatus::AiApproved),
            "ai-rejected" => Ok(ConnectionStatus::AiRejected),
            "ai-error" => Ok(ConnectionStatus::AiError),
            other => Err(format!("Unknown connection status: {other}")),
        }
    }
}

/// Directed edge between two pods on the canvas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    #[serde(default)]
    pub source_pod_id: Option<String>,
    pub source_anchor: Anchor,
    pub target_pod_id: String,
    pub target_anchor: Anchor,
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    #[serde(default, alias = "connectionStatus")]
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decide_reason: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Connection {
    pub fn touches_pod(&self, pod_id: &str) -> bool {
        self.target_pod_id == pod_id || self.source_pod_id.as_deref() == Some(pod_id)
    }

    /// True when this edge runs from `source_pod_id` to `target_pod_id`, ignoring anchors.
    pub fn same_endpoints(&self, source_pod_id: Option<&str>, target_pod_id: &str) -> bool {
        self.source_pod_id.as_deref() == source_pod_id && self.target_pod_id == target_pod_id
    }

    /// Applies a status change, keeping `decide_reason` only where it is meaningful.
    pub fn set_status(&mut self, status: ConnectionStatus, reason: Option<String>) {
        self.status = status;
        self.decide_reason = if status.keeps_decide_reason() {
            reason
        } else {
            None
        };
    }
}

/// Repository entry mirrored from the sibling repository store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub current_branch: Option<String>,
}
