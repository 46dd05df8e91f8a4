//! Append-only audit log entries

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Outcome level of an audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// One write-once audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: String,
    /// Entity kind the action touched, or a subsystem tag such as `queue`
    /// for actions that span kinds
    pub kind: String,
    /// Action tag, conventionally `<verb>:<resource id>`
    pub action: String,
    pub resource_id: String,
    /// Snapshot of the payload that triggered the action
    pub payload: serde_json::Value,
    pub level: LogLevel,
    /// Resolved actor, when a bearer credential was presented
    pub actor_id: Option<String>,
    /// Timestamp (Unix ms)
    pub timestamp: i64,
}

impl SyncLogEntry {
    /// Create a new entry stamped with the current time
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        action: impl Into<String>,
        resource_id: impl Into<String>,
        payload: serde_json::Value,
        level: LogLevel,
        actor_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind: kind.into(),
            action: action.into(),
            resource_id: resource_id.into(),
            payload,
            level,
            actor_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
