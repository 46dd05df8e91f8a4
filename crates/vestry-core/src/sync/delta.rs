//! Delta sync for pull-based devices
//!
//! A device supplies its last checkpoint and receives records changed since,
//! capped per kind to bound response size. The server checkpoint is captured
//! *before* the per-kind queries run: a record written while the queries
//! execute may appear in both this response and the next one (harmless), but
//! can never be skipped forever. Capturing after the queries would open that
//! skip window.

use std::collections::BTreeMap;

use libsql::Connection;
use serde::{Deserialize, Serialize};

use crate::db::{
    DeviceRepository, LibSqlDeviceRepository, LibSqlRecordRepository, RecordRepository, RecordRow,
};
use crate::error::{Error, Result};
use crate::models::{DeviceSyncState, EntityKind};
use crate::util::now_millis;

/// Delta sync request body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaSyncRequest {
    pub device_id: String,
    /// Checkpoint from the previous call (Unix ms); absent on first sync
    #[serde(default)]
    pub last_sync_at: Option<i64>,
    /// Kinds to sync; absent means the full supported set
    #[serde(default)]
    pub requested_kinds: Option<Vec<String>>,
}

/// Delta sync response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaSyncResponse {
    /// Server checkpoint to supply as the next `lastSyncAt`
    pub timestamp: i64,
    pub device_id: String,
    /// Changed records per kind
    pub data: BTreeMap<String, Vec<RecordRow>>,
}

/// Serve one delta sync call and advance the device's checkpoint.
pub async fn delta_sync(conn: &Connection, request: &DeltaSyncRequest) -> Result<DeltaSyncResponse> {
    let device_id = request.device_id.trim();
    if device_id.is_empty() {
        return Err(Error::InvalidInput("deviceId must not be empty".into()));
    }

    let kinds = match &request.requested_kinds {
        Some(names) if !names.is_empty() => names
            .iter()
            .map(|name| name.parse::<EntityKind>().map_err(Error::InvalidInput))
            .collect::<Result<Vec<_>>>()?,
        _ => EntityKind::ALL.to_vec(),
    };
    let since = request.last_sync_at.unwrap_or(0);

    // Checkpoint before querying, so concurrent writes land in the next pull
    let checkpoint = now_millis();

    let records = LibSqlRecordRepository::new(conn);
    let mut data = BTreeMap::new();
    for kind in &kinds {
        let rows = records
            .changed_since(*kind, since, kind.delta_cap())
            .await?;
        data.insert(kind.as_str().to_string(), rows);
    }

    let devices = LibSqlDeviceRepository::new(conn);
    devices
        .upsert(&DeviceSyncState::active(device_id, checkpoint, kinds))
        .await?;

    tracing::debug!(
        device_id,
        since,
        checkpoint,
        kinds = data.len(),
        "Served delta sync"
    );

    Ok(DeltaSyncResponse {
        timestamp: checkpoint,
        device_id: device_id.to_string(),
        data,
    })
}
