//! Queue processor
//!
//! Drains the task queue in one batch sweep: claim, dispatch to the type
//! handler, apply the returned effects, record the outcome. One item's
//! failure never aborts the sweep.

use libsql::Connection;
use serde::Serialize;

use crate::db::{LibSqlTaskRepository, SyncTaskRepository};
use crate::error::{Error, Result};
use crate::models::{EntityKind, SyncTask, TaskId};
use crate::util::compact_text;

use super::effect;
use super::handlers::HandlerRegistry;
use super::{BATCH_CAP, MAX_ATTEMPTS};

/// Outcome of one task within a sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub kind: EntityKind,
    pub action: String,
    /// `processed`, `retrying`, or `failed`
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one queue sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub items_seen: u64,
    pub successes: u64,
    pub failures: u64,
    pub details: Vec<TaskOutcome>,
}

/// Drain up to `BATCH_CAP` pending tasks once.
///
/// Tasks are claimed oldest-first with a conditional `pending ->
/// in_progress` update, so a concurrently running sweep can never dispatch
/// the same task.
pub async fn process_queue(conn: &Connection, registry: &HandlerRegistry) -> Result<SweepSummary> {
    let tasks = LibSqlTaskRepository::new(conn);
    let claimed = tasks.claim_batch(BATCH_CAP, MAX_ATTEMPTS).await?;

    let mut summary = SweepSummary {
        items_seen: claimed.len() as u64,
        successes: 0,
        failures: 0,
        details: Vec::with_capacity(claimed.len()),
    };

    for task in claimed {
        let detail = dispatch_one(conn, registry, &tasks, task).await?;
        match detail.outcome {
            "processed" => summary.successes += 1,
            _ => summary.failures += 1,
        }
        summary.details.push(detail);
    }

    tracing::info!(
        items_seen = summary.items_seen,
        successes = summary.successes,
        failures = summary.failures,
        "Queue sweep complete"
    );

    Ok(summary)
}

/// Dispatch one claimed task and persist its outcome.
///
/// Only store errors while recording the outcome propagate; handler and
/// effect errors are captured in the returned detail.
async fn dispatch_one(
    conn: &Connection,
    registry: &HandlerRegistry,
    tasks: &LibSqlTaskRepository<'_>,
    task: SyncTask,
) -> Result<TaskOutcome> {
    let result = match registry.get(task.kind) {
        Some(handler) => match handler.apply(&task) {
            Ok(effects) => effect::apply(conn, None, effects).await.map(|_| ()),
            Err(error) => Err(error),
        },
        None => Err(Error::NoHandler(task.kind.to_string())),
    };

    match result {
        Ok(()) => {
            tasks.mark_processed(&task.id).await?;
            Ok(TaskOutcome {
                task_id: task.id,
                kind: task.kind,
                action: task.action,
                outcome: "processed",
                error: None,
            })
        }
        Err(error) => {
            let message = compact_text(&error.to_string());
            let exhausted = task.attempts + 1 >= MAX_ATTEMPTS;
            if exhausted {
                tasks.mark_failed(&task.id, &message).await?;
            } else {
                tasks.mark_retry(&task.id, &message).await?;
            }
            tracing::warn!(
                task_id = %task.id,
                kind = %task.kind,
                attempts = task.attempts + 1,
                exhausted,
                error = %message,
                "Task dispatch failed"
            );
            Ok(TaskOutcome {
                task_id: task.id,
                kind: task.kind,
                action: task.action,
                outcome: if exhausted { "failed" } else { "retrying" },
                error: Some(message),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::TaskStatus;
    use crate::sync::handlers::TypeHandler;
    use crate::sync::Effect;
    use serde_json::json;
    use std::sync::Arc;

    struct AlwaysFails;

    impl TypeHandler for AlwaysFails {
        fn apply(&self, _task: &SyncTask) -> Result<Vec<Effect>> {
            Err(Error::Handler("downstream unavailable".to_string()))
        }
    }

    struct AlwaysSucceeds;

    impl TypeHandler for AlwaysSucceeds {
        fn apply(&self, _task: &SyncTask) -> Result<Vec<Effect>> {
            Ok(Vec::new())
        }
    }

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn registry_with(kind: EntityKind, handler: Arc<dyn TypeHandler>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register(kind, handler);
        registry
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_all_successes_drain_the_queue() {
        let db = setup().await;
        let conn = db.connection();
        let tasks = LibSqlTaskRepository::new(conn);
        let registry = registry_with(EntityKind::Event, Arc::new(AlwaysSucceeds));

        for n in 0..4 {
            tasks
                .enqueue(EntityKind::Event, "insert", &json!({"id": format!("e{n}")}))
                .await
                .unwrap();
        }

        let summary = process_queue(conn, &registry).await.unwrap();
        assert_eq!(summary.items_seen, 4);
        assert_eq!(summary.successes, 4);
        assert_eq!(summary.failures, 0);

        let counts = tasks.status_counts(0).await.unwrap();
        assert_eq!(counts.processed, 4);
        assert_eq!(counts.pending, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_task_exhausts_after_max_attempts_sweeps() {
        let db = setup().await;
        let conn = db.connection();
        let tasks = LibSqlTaskRepository::new(conn);
        let registry = registry_with(EntityKind::Group, Arc::new(AlwaysFails));

        let task = tasks
            .enqueue(EntityKind::Group, "update", &json!({"id": "g1"}))
            .await
            .unwrap();

        for sweep in 1..=MAX_ATTEMPTS {
            let summary = process_queue(conn, &registry).await.unwrap();
            assert_eq!(summary.items_seen, 1, "sweep {sweep} should see the task");
            assert_eq!(summary.failures, 1);

            let current = tasks.get(&task.id).await.unwrap().unwrap();
            assert_eq!(current.attempts, sweep);
            if sweep < MAX_ATTEMPTS {
                assert_eq!(current.status, TaskStatus::Pending);
            } else {
                assert_eq!(current.status, TaskStatus::Failed);
            }
        }

        // A further sweep sees nothing; the terminal task never changes
        let summary = process_queue(conn, &registry).await.unwrap();
        assert_eq!(summary.items_seen, 0);
        let terminal = tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(terminal.status, TaskStatus::Failed);
        assert_eq!(terminal.attempts, MAX_ATTEMPTS);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_one_failure_never_aborts_the_sweep() {
        let db = setup().await;
        let conn = db.connection();
        let tasks = LibSqlTaskRepository::new(conn);

        let mut registry = HandlerRegistry::new();
        registry.register(EntityKind::Event, Arc::new(AlwaysSucceeds));
        registry.register(EntityKind::Group, Arc::new(AlwaysFails));

        tasks
            .enqueue(EntityKind::Event, "insert", &json!({"id": "e1"}))
            .await
            .unwrap();
        tasks
            .enqueue(EntityKind::Group, "insert", &json!({"id": "g1"}))
            .await
            .unwrap();
        tasks
            .enqueue(EntityKind::Event, "insert", &json!({"id": "e2"}))
            .await
            .unwrap();

        let summary = process_queue(conn, &registry).await.unwrap();
        assert_eq!(summary.items_seen, 3);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.details.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_handler_counts_as_failure() {
        let db = setup().await;
        let conn = db.connection();
        let tasks = LibSqlTaskRepository::new(conn);
        let registry = HandlerRegistry::new();

        tasks
            .enqueue(EntityKind::Person, "insert", &json!({"id": "p1"}))
            .await
            .unwrap();

        let summary = process_queue(conn, &registry).await.unwrap();
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.details[0].outcome, "retrying");
        assert!(summary.details[0]
            .error
            .as_deref()
            .unwrap()
            .contains("No handler"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_abandoned_claim_is_swept_again_after_staleness() {
        use crate::db::STALE_CLAIM_MS;

        let db = setup().await;
        let conn = db.connection();
        let tasks = LibSqlTaskRepository::new(conn);
        let registry = registry_with(EntityKind::Event, Arc::new(AlwaysSucceeds));

        let task = tasks
            .enqueue(EntityKind::Event, "insert", &json!({"id": "e1"}))
            .await
            .unwrap();

        // A sweep that claimed the task and then died before marking it
        let claimed = tasks.claim_batch(BATCH_CAP, MAX_ATTEMPTS).await.unwrap();
        assert_eq!(claimed.len(), 1);
        drop(claimed);

        // While the claim is fresh, follow-up sweeps leave it alone
        let summary = process_queue(conn, &registry).await.unwrap();
        assert_eq!(summary.items_seen, 0);

        conn.execute(
            "UPDATE sync_tasks SET claimed_at = claimed_at - ?",
            [STALE_CLAIM_MS + 1],
        )
        .await
        .unwrap();

        let summary = process_queue(conn, &registry).await.unwrap();
        assert_eq!(summary.items_seen, 1);
        assert_eq!(summary.successes, 1);

        let current = tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(current.status, TaskStatus::Processed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_attempts_never_exceed_max() {
        let db = setup().await;
        let conn = db.connection();
        let tasks = LibSqlTaskRepository::new(conn);
        let registry = registry_with(EntityKind::Event, Arc::new(AlwaysFails));

        let task = tasks
            .enqueue(EntityKind::Event, "insert", &json!({"id": "e1"}))
            .await
            .unwrap();

        // More sweeps than attempts allowed
        for _ in 0..(MAX_ATTEMPTS + 3) {
            process_queue(conn, &registry).await.unwrap();
        }

        let current = tasks.get(&task.id).await.unwrap().unwrap();
        assert_eq!(current.attempts, MAX_ATTEMPTS);
        assert_eq!(current.status, TaskStatus::Failed);
    }
}
