//! Normalized change notifications consumed by event ingestion

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::task::EntityKind;

/// Kind of mutation the system of record reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl ChangeType {
    /// Stable string form used in task actions and audit entries
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    /// Webhook payloads use upper-case Postgres-style tags; accept both.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown change type: {other}")),
        }
    }
}

/// One normalized change notification (ephemeral, never persisted)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub change_type: ChangeType,
    pub entity_kind: EntityKind,
    /// The record after the change (before, for deletes)
    pub record: serde_json::Value,
    /// The record before the change, when the source supplies it
    pub previous_record: Option<serde_json::Value>,
}

impl ChangeEvent {
    /// Id of the affected record, when the payload carries one
    #[must_use]
    pub fn record_id(&self) -> Option<&str> {
        self.record.get("id").and_then(serde_json::Value::as_str)
    }

    /// Look up a field on the post-change record
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.record.get(name)
    }

    /// Look up a field on the pre-change record
    #[must_use]
    pub fn previous_field(&self, name: &str) -> Option<&serde_json::Value> {
        self.previous_record.as_ref().and_then(|r| r.get(name))
    }

    /// True when `name` differs between the pre- and post-change records.
    ///
    /// Without a previous record there is nothing to compare, so no update
    /// rule keyed on a field transition fires.
    #[must_use]
    pub fn field_changed(&self, name: &str) -> bool {
        match &self.previous_record {
            Some(previous) => previous.get(name) != self.record.get(name),
            None => false,
        }
    }
}
