//! Audit log sink
//!
//! A failure while writing an audit entry must never abort the operation
//! being logged, so `record` swallows errors after reporting them on the
//! process log (the fallback channel).

use libsql::Connection;

use crate::db::{LibSqlLogRepository, LogRepository};
use crate::error::Result;
use crate::models::SyncLogEntry;

/// Append-only audit sink over the `sync_log` table
pub struct AuditSink<'a> {
    conn: &'a Connection,
}

impl<'a> AuditSink<'a> {
    /// Create a sink over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append one entry, swallowing any write failure
    pub async fn record(&self, entry: &SyncLogEntry) {
        let repo = LibSqlLogRepository::new(self.conn);
        if let Err(error) = repo.append(entry).await {
            tracing::error!(
                action = %entry.action,
                resource_id = %entry.resource_id,
                %error,
                "Failed to write audit entry"
            );
        }
    }

    /// Most recent entries, newest first
    pub async fn recent(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        LibSqlLogRepository::new(self.conn).recent(limit).await
    }
}
