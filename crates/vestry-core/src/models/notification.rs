//! Notification intents awaiting delivery

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Delivery priority flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    High,
}

impl Priority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// A notification recorded for later delivery by an external transport.
///
/// `dedupe_key` is the natural key: writing the same intent twice (a
/// reconciliation re-run, a duplicate webhook) upserts instead of
/// duplicating, which is what makes handler effects safely repeatable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub id: String,
    pub recipient_id: String,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub dedupe_key: String,
    /// Timestamp (Unix ms)
    pub created_at: i64,
    pub delivered: bool,
}

impl NotificationIntent {
    /// Create a new undelivered intent stamped with the current time
    #[must_use]
    pub fn new(
        recipient_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        priority: Priority,
        dedupe_key: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            recipient_id: recipient_id.into(),
            title: title.into(),
            body: body.into(),
            priority,
            dedupe_key: dedupe_key.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
            delivered: false,
        }
    }
}
