//! Sync task queue repository

use crate::error::{Error, Result};
use crate::models::{EntityKind, SyncTask, TaskId, TaskStatus};
use libsql::{params, Connection};

use super::{opt_i64, opt_text};

/// Trait for task queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SyncTaskRepository {
    /// Append a new pending task
    async fn enqueue(
        &self,
        kind: EntityKind,
        action: &str,
        payload: &serde_json::Value,
    ) -> Result<SyncTask>;

    /// Get a task by ID
    async fn get(&self, id: &TaskId) -> Result<Option<SyncTask>>;

    /// Claim up to `limit` pending tasks with fewer than `max_attempts`
    /// attempts, oldest first.
    ///
    /// Each returned task has been atomically moved `pending -> in_progress`
    /// via a conditional update, so a concurrently running sweep can never
    /// receive the same task. Claims older than [`STALE_CLAIM_MS`] are
    /// returned to the pending pool first, so a sweep that died between
    /// claiming and marking cannot strand its tasks forever.
    async fn claim_batch(&self, limit: usize, max_attempts: u32) -> Result<Vec<SyncTask>>;

    /// Mark a claimed task as terminally processed
    async fn mark_processed(&self, id: &TaskId) -> Result<()>;

    /// Record a failed attempt and return the task to the pending pool
    async fn mark_retry(&self, id: &TaskId, error: &str) -> Result<()>;

    /// Record a final failed attempt; the task becomes terminal
    async fn mark_failed(&self, id: &TaskId, error: &str) -> Result<()>;

    /// Count tasks per status created at or after `since` (Unix ms)
    async fn status_counts(&self, since: i64) -> Result<StatusCounts>;
}

/// Claims older than this are treated as abandoned and reclaimed
pub const STALE_CLAIM_MS: i64 = 5 * 60 * 1000;

/// Aggregate queue counts for the status endpoint
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub processed: u64,
    pub failed: u64,
}

/// libSQL implementation of `SyncTaskRepository`
pub struct LibSqlTaskRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlTaskRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_task(row: &libsql::Row) -> Result<SyncTask> {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let action: String = row.get(2)?;
        let payload: String = row.get(3)?;
        let status: String = row.get(4)?;
        let attempts: i64 = row.get(5)?;

        Ok(SyncTask {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid task id: {id}")))?,
            kind: kind.parse().map_err(Error::Database)?,
            action,
            payload: serde_json::from_str(&payload)?,
            status: status.parse().map_err(Error::Database)?,
            attempts: u32::try_from(attempts)
                .map_err(|_| Error::Database(format!("invalid attempts: {attempts}")))?,
            last_error: opt_text(row, 6)?,
            created_at: row.get(7)?,
            processed_at: opt_i64(row, 8)?,
        })
    }
}

const TASK_COLUMNS: &str =
    "id, kind, action, payload, status, attempts, last_error, created_at, processed_at";

impl SyncTaskRepository for LibSqlTaskRepository<'_> {
    async fn enqueue(
        &self,
        kind: EntityKind,
        action: &str,
        payload: &serde_json::Value,
    ) -> Result<SyncTask> {
        let task = SyncTask::new(kind, action, payload.clone());

        self.conn
            .execute(
                "INSERT INTO sync_tasks (id, kind, action, payload, status, attempts, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    task.id.as_str(),
                    task.kind.as_str(),
                    task.action.clone(),
                    serde_json::to_string(&task.payload)?,
                    task.status.as_str(),
                    i64::from(task.attempts),
                    task.created_at,
                ],
            )
            .await?;

        Ok(task)
    }

    async fn get(&self, id: &TaskId) -> Result<Option<SyncTask>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM sync_tasks WHERE id = ?"),
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn claim_batch(&self, limit: usize, max_attempts: u32) -> Result<Vec<SyncTask>> {
        let now = chrono::Utc::now().timestamp_millis();

        // A sweep interrupted between claiming and marking (client
        // disconnect, process restart) leaves rows stuck in_progress;
        // return those to the pending pool without charging an attempt.
        let reclaimed = self
            .conn
            .execute(
                "UPDATE sync_tasks SET status = 'pending', claimed_at = NULL
                 WHERE status = 'in_progress' AND claimed_at <= ?",
                [now - STALE_CLAIM_MS],
            )
            .await?;
        if reclaimed > 0 {
            tracing::warn!(reclaimed, "Reclaimed stale in-progress tasks");
        }

        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM sync_tasks
                     WHERE status = 'pending' AND attempts < ?
                     ORDER BY created_at ASC, rowid ASC
                     LIMIT ?"
                ),
                params![i64::from(max_attempts), limit as i64],
            )
            .await?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next().await? {
            candidates.push(Self::parse_task(&row)?);
        }

        // Claim each candidate with a compare-and-swap; a row already taken
        // by a concurrent sweep affects zero rows and is skipped.
        let mut claimed = Vec::new();
        for mut task in candidates {
            let affected = self
                .conn
                .execute(
                    "UPDATE sync_tasks SET status = 'in_progress', claimed_at = ?
                     WHERE id = ? AND status = 'pending'",
                    params![now, task.id.as_str()],
                )
                .await?;

            if affected == 1 {
                task.status = TaskStatus::InProgress;
                claimed.push(task);
            }
        }

        Ok(claimed)
    }

    async fn mark_processed(&self, id: &TaskId) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let affected = self
            .conn
            .execute(
                "UPDATE sync_tasks
                 SET status = 'processed', processed_at = ?, last_error = NULL, claimed_at = NULL
                 WHERE id = ? AND status = 'in_progress'",
                params![now, id.as_str()],
            )
            .await?;

        if affected == 0 {
            return Err(Error::NotFound(format!("claimed task {id}")));
        }

        Ok(())
    }

    async fn mark_retry(&self, id: &TaskId, error: &str) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE sync_tasks
                 SET status = 'pending', attempts = attempts + 1, last_error = ?, claimed_at = NULL
                 WHERE id = ? AND status = 'in_progress'",
                params![error, id.as_str()],
            )
            .await?;

        if affected == 0 {
            return Err(Error::NotFound(format!("claimed task {id}")));
        }

        Ok(())
    }

    async fn mark_failed(&self, id: &TaskId, error: &str) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE sync_tasks
                 SET status = 'failed', attempts = attempts + 1, last_error = ?, claimed_at = NULL
                 WHERE id = ? AND status = 'in_progress'",
                params![error, id.as_str()],
            )
            .await?;

        if affected == 0 {
            return Err(Error::NotFound(format!("claimed task {id}")));
        }

        Ok(())
    }

    async fn status_counts(&self, since: i64) -> Result<StatusCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*) FROM sync_tasks
                 WHERE created_at >= ?
                 GROUP BY status",
                [since],
            )
            .await?;

        let mut counts = StatusCounts::default();
        while let Some(row) = rows.next().await? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let count = u64::try_from(count).unwrap_or_default();
            match status.parse::<TaskStatus>().map_err(Error::Database)? {
                TaskStatus::Pending => counts.pending = count,
                TaskStatus::InProgress => counts.in_progress = count,
                TaskStatus::Processed => counts.processed = count,
                TaskStatus::Failed => counts.failed = count,
            }
        }

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_and_get() {
        let db = setup().await;
        let repo = LibSqlTaskRepository::new(db.connection());

        let task = repo
            .enqueue(EntityKind::Event, "insert", &json!({"id": "e1"}))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let fetched = repo.get(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched, task);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_claim_batch_is_fifo_and_claims() {
        let db = setup().await;
        let repo = LibSqlTaskRepository::new(db.connection());

        let first = repo
            .enqueue(EntityKind::Event, "insert", &json!({"n": 1}))
            .await
            .unwrap();
        let second = repo
            .enqueue(EntityKind::Group, "insert", &json!({"n": 2}))
            .await
            .unwrap();

        let claimed = repo.claim_batch(10, 3).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].id, first.id);
        assert_eq!(claimed[1].id, second.id);
        assert!(claimed.iter().all(|t| t.status == TaskStatus::InProgress));

        // A second sweep sees nothing to claim
        let again = repo.claim_batch(10, 3).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_claim_batch_respects_limit() {
        let db = setup().await;
        let repo = LibSqlTaskRepository::new(db.connection());

        for n in 0..5 {
            repo.enqueue(EntityKind::Person, "update", &json!({"n": n}))
                .await
                .unwrap();
        }

        let claimed = repo.claim_batch(3, 3).await.unwrap();
        assert_eq!(claimed.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_processed_clears_error() {
        let db = setup().await;
        let repo = LibSqlTaskRepository::new(db.connection());

        let task = repo
            .enqueue(EntityKind::Event, "insert", &json!({}))
            .await
            .unwrap();
        let claimed = repo.claim_batch(1, 3).await.unwrap();
        repo.mark_retry(&claimed[0].id, "transient").await.unwrap();

        let claimed = repo.claim_batch(1, 3).await.unwrap();
        repo.mark_processed(&claimed[0].id).await.unwrap();

        let done = repo.get(&task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Processed);
        assert_eq!(done.attempts, 1);
        assert!(done.last_error.is_none());
        assert!(done.processed_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_then_exhaustion() {
        let db = setup().await;
        let repo = LibSqlTaskRepository::new(db.connection());

        let task = repo
            .enqueue(EntityKind::Group, "update", &json!({}))
            .await
            .unwrap();

        for _ in 0..2 {
            let claimed = repo.claim_batch(1, 3).await.unwrap();
            repo.mark_retry(&claimed[0].id, "boom").await.unwrap();
        }

        let claimed = repo.claim_batch(1, 3).await.unwrap();
        repo.mark_failed(&claimed[0].id, "boom").await.unwrap();

        let failed = repo.get(&task.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.attempts, 3);
        assert_eq!(failed.last_error.as_deref(), Some("boom"));

        // Terminal tasks are never claimed again
        let again = repo.claim_batch(1, 3).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exhausted_attempts_excluded_from_claim() {
        let db = setup().await;
        let repo = LibSqlTaskRepository::new(db.connection());

        repo.enqueue(EntityKind::Event, "insert", &json!({}))
            .await
            .unwrap();
        let claimed = repo.claim_batch(1, 1).await.unwrap();
        repo.mark_retry(&claimed[0].id, "boom").await.unwrap();

        // attempts == max_attempts, so the task is no longer eligible
        let again = repo.claim_batch(1, 1).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stale_claim_is_reclaimed() {
        let db = setup().await;
        let repo = LibSqlTaskRepository::new(db.connection());

        let task = repo
            .enqueue(EntityKind::Event, "insert", &json!({}))
            .await
            .unwrap();
        let claimed = repo.claim_batch(1, 3).await.unwrap();
        assert_eq!(claimed.len(), 1);

        // A fresh claim is not up for grabs
        let again = repo.claim_batch(1, 3).await.unwrap();
        assert!(again.is_empty());

        // Age the claim past the staleness threshold
        db.connection()
            .execute(
                "UPDATE sync_tasks SET claimed_at = claimed_at - ?",
                [STALE_CLAIM_MS + 1],
            )
            .await
            .unwrap();

        let reclaimed = repo.claim_batch(1, 3).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, task.id);
        // Reclaiming does not charge an attempt
        assert_eq!(reclaimed[0].attempts, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_status_counts() {
        let db = setup().await;
        let repo = LibSqlTaskRepository::new(db.connection());

        repo.enqueue(EntityKind::Event, "insert", &json!({}))
            .await
            .unwrap();
        repo.enqueue(EntityKind::Event, "insert", &json!({}))
            .await
            .unwrap();
        let claimed = repo.claim_batch(1, 3).await.unwrap();
        repo.mark_processed(&claimed[0].id).await.unwrap();

        let counts = repo.status_counts(0).await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processed, 1);
        assert_eq!(counts.failed, 0);
    }
}
