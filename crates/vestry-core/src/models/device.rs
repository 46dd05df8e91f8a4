//! Per-device delta sync checkpoint

use serde::{Deserialize, Serialize};

use super::task::EntityKind;

/// A pull client's sync checkpoint, keyed by its self-supplied device id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSyncState {
    /// Client-supplied opaque identifier (unique key)
    pub device_id: String,
    /// Checkpoint handed back to the device (Unix ms)
    pub last_sync_at: i64,
    /// Entity kinds the device last requested
    pub requested_kinds: Vec<EntityKind>,
    /// Lifecycle marker (`active` once the device has synced)
    pub status: String,
}

impl DeviceSyncState {
    /// Build the state recorded after a successful delta sync call
    #[must_use]
    pub fn active(
        device_id: impl Into<String>,
        last_sync_at: i64,
        requested_kinds: Vec<EntityKind>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            last_sync_at,
            requested_kinds,
            status: "active".to_string(),
        }
    }
}
