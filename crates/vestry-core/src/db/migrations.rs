//! Database migrations

use crate::error::{Error, Result};
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;
    if version > CURRENT_VERSION {
        return Err(Error::Database(format!(
            "database schema version {version} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Apply one migration's statements inside a transaction
async fn apply(conn: &Connection, statements: &[&str], version: i32) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: sync subsystem tables
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Task queue
        "CREATE TABLE IF NOT EXISTS sync_tasks (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            action TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            claimed_at INTEGER,
            created_at INTEGER NOT NULL,
            processed_at INTEGER
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_tasks_status_created
            ON sync_tasks(status, created_at ASC)",
        "CREATE INDEX IF NOT EXISTS idx_sync_tasks_created ON sync_tasks(created_at DESC)",
        // Device checkpoints
        "CREATE TABLE IF NOT EXISTS device_sync_state (
            device_id TEXT PRIMARY KEY,
            last_sync_at INTEGER NOT NULL,
            requested_kinds TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active'
        )",
        "CREATE INDEX IF NOT EXISTS idx_device_sync_last ON device_sync_state(last_sync_at DESC)",
        // Audit log, append-only
        "CREATE TABLE IF NOT EXISTS sync_log (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            action TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            level TEXT NOT NULL,
            actor_id TEXT,
            timestamp INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_log_timestamp ON sync_log(timestamp DESC)",
        // Rate limit log, append-only; no pruning (known operational gap)
        "CREATE TABLE IF NOT EXISTS rate_limit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ip TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_rate_limit_key
            ON rate_limit_log(ip, endpoint, timestamp)",
        // Notification intents, deduplicated by natural key
        "CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            recipient_id TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'normal',
            dedupe_key TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            delivered INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE INDEX IF NOT EXISTS idx_notifications_recipient
            ON notifications(recipient_id)",
        "CREATE INDEX IF NOT EXISTS idx_notifications_undelivered
            ON notifications(delivered, created_at ASC)",
        // Resource-scoped capability grants
        "CREATE TABLE IF NOT EXISTS access_grants (
            holder_id TEXT NOT NULL,
            capability TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            granted_at INTEGER NOT NULL,
            PRIMARY KEY (holder_id, capability, resource_id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_access_grants_resource
            ON access_grants(resource_id)",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    apply(conn, &statements, 1).await
}

/// Migration to version 2: member record tables read by delta sync and
/// reconciliation (the subsystem never exposes CRUD for these)
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_events_updated ON events(updated_at ASC)",
        "CREATE TABLE IF NOT EXISTS groups (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_groups_updated ON groups(updated_at ASC)",
        "CREATE TABLE IF NOT EXISTS people (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'member',
            is_active INTEGER NOT NULL DEFAULT 1,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_people_updated ON people(updated_at ASC)",
        "CREATE INDEX IF NOT EXISTS idx_people_role ON people(role, is_active)",
        "CREATE TABLE IF NOT EXISTS financial_entries (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_financial_entries_updated
            ON financial_entries(updated_at ASC)",
        "INSERT INTO schema_version (version) VALUES (2)",
    ];

    apply(conn, &statements, 2).await
}
