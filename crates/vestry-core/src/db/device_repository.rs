//! Device checkpoint repository

use crate::error::{Error, Result};
use crate::models::{DeviceSyncState, EntityKind};
use libsql::{params, Connection};

/// Trait for device checkpoint storage operations (async)
#[allow(async_fn_in_trait)]
pub trait DeviceRepository {
    /// Insert or update a device's checkpoint (first call creates the row)
    async fn upsert(&self, state: &DeviceSyncState) -> Result<()>;

    /// Get a device's checkpoint by ID
    async fn get(&self, device_id: &str) -> Result<Option<DeviceSyncState>>;

    /// Count devices whose checkpoint is at or after `since` (Unix ms)
    async fn active_count(&self, since: i64) -> Result<u64>;
}

/// libSQL implementation of `DeviceRepository`
pub struct LibSqlDeviceRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlDeviceRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_state(row: &libsql::Row) -> Result<DeviceSyncState> {
        let kinds_json: String = row.get(2)?;
        let kind_names: Vec<String> = serde_json::from_str(&kinds_json)?;
        let requested_kinds = kind_names
            .iter()
            .map(|name| name.parse::<EntityKind>().map_err(Error::Database))
            .collect::<Result<Vec<_>>>()?;

        Ok(DeviceSyncState {
            device_id: row.get(0)?,
            last_sync_at: row.get(1)?,
            requested_kinds,
            status: row.get(3)?,
        })
    }
}

impl DeviceRepository for LibSqlDeviceRepository<'_> {
    async fn upsert(&self, state: &DeviceSyncState) -> Result<()> {
        let kinds: Vec<&str> = state.requested_kinds.iter().map(|k| k.as_str()).collect();
        self.conn
            .execute(
                "INSERT INTO device_sync_state (device_id, last_sync_at, requested_kinds, status)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(device_id) DO UPDATE SET
                     last_sync_at = excluded.last_sync_at,
                     requested_kinds = excluded.requested_kinds,
                     status = excluded.status",
                params![
                    state.device_id.clone(),
                    state.last_sync_at,
                    serde_json::to_string(&kinds)?,
                    state.status.clone(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, device_id: &str) -> Result<Option<DeviceSyncState>> {
        let mut rows = self
            .conn
            .query(
                "SELECT device_id, last_sync_at, requested_kinds, status
                 FROM device_sync_state WHERE device_id = ?",
                [device_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_state(&row)?)),
            None => Ok(None),
        }
    }

    async fn active_count(&self, since: i64) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM device_sync_state
                 WHERE status = 'active' AND last_sync_at >= ?",
                [since],
            )
            .await?;

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_creates_then_updates() {
        let db = setup().await;
        let repo = LibSqlDeviceRepository::new(db.connection());

        let first = DeviceSyncState::active("phone-1", 1000, vec![EntityKind::Event]);
        repo.upsert(&first).await.unwrap();

        let second = DeviceSyncState::active(
            "phone-1",
            2000,
            vec![EntityKind::Event, EntityKind::Group],
        );
        repo.upsert(&second).await.unwrap();

        let stored = repo.get("phone-1").await.unwrap().unwrap();
        assert_eq!(stored.last_sync_at, 2000);
        assert_eq!(stored.requested_kinds.len(), 2);
        assert_eq!(stored.status, "active");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_active_count_window() {
        let db = setup().await;
        let repo = LibSqlDeviceRepository::new(db.connection());

        repo.upsert(&DeviceSyncState::active("old", 100, vec![EntityKind::Event]))
            .await
            .unwrap();
        repo.upsert(&DeviceSyncState::active("new", 5000, vec![EntityKind::Event]))
            .await
            .unwrap();

        assert_eq!(repo.active_count(1000).await.unwrap(), 1);
        assert_eq!(repo.active_count(0).await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_missing_device() {
        let db = setup().await;
        let repo = LibSqlDeviceRepository::new(db.connection());
        assert!(repo.get("nope").await.unwrap().is_none());
    }
}
