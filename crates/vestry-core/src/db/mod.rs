//! Database layer for the sync subsystem

mod connection;
mod device_repository;
mod grant_repository;
mod log_repository;
mod migrations;
mod notification_repository;
mod rate_limit_repository;
mod record_repository;
mod task_repository;

pub use connection::{Database, ReplicaConfig};
pub use device_repository::{DeviceRepository, LibSqlDeviceRepository};
pub use grant_repository::{GrantRepository, LibSqlGrantRepository};
pub use log_repository::{LibSqlLogRepository, LogRepository};
pub use notification_repository::{LibSqlNotificationRepository, NotificationRepository};
pub use rate_limit_repository::{LibSqlRateLimitRepository, RateLimitRepository};
pub use record_repository::{LibSqlRecordRepository, RecordRepository, RecordRow};
pub use task_repository::{LibSqlTaskRepository, StatusCounts, SyncTaskRepository, STALE_CLAIM_MS};

use crate::error::{Error, Result};

/// Read a nullable TEXT column
pub(crate) fn opt_text(row: &libsql::Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Text(text) => Ok(Some(text)),
        other => Err(Error::Database(format!(
            "expected TEXT or NULL at column {idx}, got {other:?}"
        ))),
    }
}

/// Read a nullable INTEGER column
pub(crate) fn opt_i64(row: &libsql::Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Integer(value) => Ok(Some(value)),
        other => Err(Error::Database(format!(
            "expected INTEGER or NULL at column {idx}, got {other:?}"
        ))),
    }
}
