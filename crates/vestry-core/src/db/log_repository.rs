//! Audit log repository

use crate::error::{Error, Result};
use crate::models::SyncLogEntry;
use libsql::{params, Connection};

use super::opt_text;

/// Trait for audit log storage operations (async)
#[allow(async_fn_in_trait)]
pub trait LogRepository {
    /// Append one write-once entry
    async fn append(&self, entry: &SyncLogEntry) -> Result<()>;

    /// Most recent entries, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<SyncLogEntry>>;
}

/// libSQL implementation of `LogRepository`
pub struct LibSqlLogRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlLogRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &libsql::Row) -> Result<SyncLogEntry> {
        let payload: String = row.get(4)?;
        let level: String = row.get(5)?;

        Ok(SyncLogEntry {
            id: row.get(0)?,
            kind: row.get(1)?,
            action: row.get(2)?,
            resource_id: row.get(3)?,
            payload: serde_json::from_str(&payload)?,
            level: level.parse().map_err(Error::Database)?,
            actor_id: opt_text(row, 6)?,
            timestamp: row.get(7)?,
        })
    }
}

impl LogRepository for LibSqlLogRepository<'_> {
    async fn append(&self, entry: &SyncLogEntry) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_log
                     (id, kind, action, resource_id, payload, level, actor_id, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    entry.id.clone(),
                    entry.kind.clone(),
                    entry.action.clone(),
                    entry.resource_id.clone(),
                    serde_json::to_string(&entry.payload)?,
                    entry.level.as_str(),
                    entry.actor_id.clone(),
                    entry.timestamp,
                ],
            )
            .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, action, resource_id, payload, level, actor_id, timestamp
                 FROM sync_log
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?",
                [limit as i64],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }
}
