//! Capability grant repository

use crate::error::Result;
use libsql::{params, Connection};

/// Trait for resource-scoped capability grant operations (async)
#[allow(async_fn_in_trait)]
pub trait GrantRepository {
    /// Grant a capability on a resource (idempotent upsert)
    async fn grant(&self, holder_id: &str, capability: &str, resource_id: &str) -> Result<()>;

    /// Revoke all of a holder's grants scoped to a resource
    async fn revoke_for_resource(&self, holder_id: &str, resource_id: &str) -> Result<u64>;

    /// Capabilities a holder currently has on a resource
    async fn capabilities(&self, holder_id: &str, resource_id: &str) -> Result<Vec<String>>;
}

/// libSQL implementation of `GrantRepository`
pub struct LibSqlGrantRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlGrantRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl GrantRepository for LibSqlGrantRepository<'_> {
    async fn grant(&self, holder_id: &str, capability: &str, resource_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                "INSERT INTO access_grants (holder_id, capability, resource_id, granted_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(holder_id, capability, resource_id) DO NOTHING",
                params![holder_id, capability, resource_id, now],
            )
            .await?;
        Ok(())
    }

    async fn revoke_for_resource(&self, holder_id: &str, resource_id: &str) -> Result<u64> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM access_grants WHERE holder_id = ? AND resource_id = ?",
                params![holder_id, resource_id],
            )
            .await?;
        Ok(affected)
    }

    async fn capabilities(&self, holder_id: &str, resource_id: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT capability FROM access_grants
                 WHERE holder_id = ? AND resource_id = ?
                 ORDER BY capability",
                params![holder_id, resource_id],
            )
            .await?;

        let mut capabilities = Vec::new();
        while let Some(row) = rows.next().await? {
            capabilities.push(row.get(0)?);
        }
        Ok(capabilities)
    }
}
