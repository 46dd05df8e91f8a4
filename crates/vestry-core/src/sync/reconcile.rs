//! Reconciliation ("force sync") job
//!
//! Rescans records changed within a trailing window and re-enqueues a task
//! for each, recovering from missed or lost webhook deliveries. This
//! deliberately enqueues duplicates for records that already propagated;
//! handlers are required to tolerate repeat invocations.

use std::collections::BTreeMap;

use libsql::Connection;
use serde::Serialize;

use crate::db::{LibSqlRecordRepository, LibSqlTaskRepository, RecordRepository, SyncTaskRepository};
use crate::error::Result;
use crate::models::{EntityKind, LogLevel, SyncLogEntry};
use crate::util::now_millis;

use super::audit::AuditSink;

/// Trailing window rescanned by default: 24 hours
pub const DEFAULT_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Cap on records re-enqueued per kind in one run
const SCAN_LIMIT: usize = 500;

/// Per-kind counts of newly enqueued tasks
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub enqueued: BTreeMap<String, u64>,
}

/// Re-enqueue a `force_sync` task for every record changed in the window.
pub async fn force_sync(
    conn: &Connection,
    window_ms: i64,
    actor_id: Option<&str>,
) -> Result<ReconcileOutcome> {
    let records = LibSqlRecordRepository::new(conn);
    let tasks = LibSqlTaskRepository::new(conn);
    let since = now_millis() - window_ms;

    let mut outcome = ReconcileOutcome::default();
    for kind in EntityKind::ALL {
        let changed = records.changed_since(kind, since, SCAN_LIMIT).await?;
        let mut count = 0u64;
        for record in changed {
            let mut payload = record.data.clone();
            if let Some(object) = payload.as_object_mut() {
                object.insert("id".to_string(), serde_json::Value::String(record.id.clone()));
            }
            tasks.enqueue(kind, "force_sync", &payload).await?;
            count += 1;
        }
        outcome.enqueued.insert(kind.as_str().to_string(), count);
    }

    let total: u64 = outcome.enqueued.values().sum();
    tracing::info!(window_ms, total, "Reconciliation run enqueued tasks");

    AuditSink::new(conn)
        .record(&SyncLogEntry::new(
            "queue",
            format!("force_sync:{total}"),
            "queue",
            serde_json::json!({ "enqueued": outcome.enqueued }),
            LogLevel::Info,
            actor_id.map(ToString::to_string),
        ))
        .await;

    Ok(outcome)
}
