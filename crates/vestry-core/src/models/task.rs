//! Sync task model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a sync task, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Entity kinds the sync subsystem propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Event,
    Group,
    Person,
    FinancialEntry,
}

impl EntityKind {
    /// All kinds served by delta sync when a device does not narrow the set
    pub const ALL: [Self; 4] = [
        Self::Event,
        Self::Group,
        Self::Person,
        Self::FinancialEntry,
    ];

    /// Stable string form used in the database and API payloads
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Group => "group",
            Self::Person => "person",
            Self::FinancialEntry => "financial_entry",
        }
    }

    /// Backing record table for this kind
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Event => "events",
            Self::Group => "groups",
            Self::Person => "people",
            Self::FinancialEntry => "financial_entries",
        }
    }

    /// Per-kind delta sync response cap, bounding response size
    #[must_use]
    pub const fn delta_cap(self) -> usize {
        match self {
            Self::Event | Self::Person | Self::FinancialEntry => 100,
            Self::Group => 50,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    /// Accepts both the kind name and its record table name, so webhook
    /// `table` values and delta-sync `requestedKinds` parse the same way.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" | "events" => Ok(Self::Event),
            "group" | "groups" => Ok(Self::Group),
            "person" | "people" => Ok(Self::Person),
            "financial_entry" | "financial_entries" => Ok(Self::FinancialEntry),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// Lifecycle status of a sync task
///
/// `InProgress` is the claim state: the processor moves a task
/// `Pending -> InProgress` with a conditional update before dispatching it,
/// so overlapping sweeps never double-apply the same task. `Processed` and
/// `Failed` are terminal and never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Processed,
    Failed,
}

impl TaskStatus {
    /// Stable string form used in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// Terminal statuses are never mutated again
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A persisted unit of deferred propagation work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTask {
    /// Unique identifier
    pub id: TaskId,
    /// Entity kind, used to look up the type handler
    pub kind: EntityKind,
    /// Action tag (`insert`, `update`, `delete`, `force_sync`)
    pub action: String,
    /// Opaque document capturing the triggering record
    pub payload: serde_json::Value,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Number of completed dispatch attempts
    pub attempts: u32,
    /// Error text from the most recent failed attempt
    pub last_error: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Success timestamp (Unix ms), set once on terminal success
    pub processed_at: Option<i64>,
}

impl SyncTask {
    /// Create a new pending task for the given kind and action
    #[must_use]
    pub fn new(kind: EntityKind, action: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            action: action.into(),
            payload,
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            processed_at: None,
        }
    }
}
