//! Notification intent repository

use crate::error::{Error, Result};
use crate::models::NotificationIntent;
use libsql::{params, Connection};

/// Trait for notification intent storage operations (async)
#[allow(async_fn_in_trait)]
pub trait NotificationRepository {
    /// Record an intent, upserting by `dedupe_key`.
    ///
    /// Re-recording an existing key refreshes title/body/priority but keeps
    /// the original row, so repeated handler invocations for the same
    /// logical record never fan out duplicate notifications.
    async fn record(&self, intent: &NotificationIntent) -> Result<()>;

    /// Undelivered intents, oldest first
    async fn undelivered(&self, limit: usize) -> Result<Vec<NotificationIntent>>;

    /// Mark a batch of intents delivered
    async fn mark_delivered(&self, ids: &[String]) -> Result<()>;

    /// All intents for one recipient (test and debugging aid)
    async fn for_recipient(&self, recipient_id: &str) -> Result<Vec<NotificationIntent>>;
}

/// libSQL implementation of `NotificationRepository`
pub struct LibSqlNotificationRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlNotificationRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_intent(row: &libsql::Row) -> Result<NotificationIntent> {
        let priority: String = row.get(4)?;
        Ok(NotificationIntent {
            id: row.get(0)?,
            recipient_id: row.get(1)?,
            title: row.get(2)?,
            body: row.get(3)?,
            priority: priority.parse().map_err(Error::Database)?,
            dedupe_key: row.get(5)?,
            created_at: row.get(6)?,
            delivered: row.get::<i32>(7)? != 0,
        })
    }
}

impl NotificationRepository for LibSqlNotificationRepository<'_> {
    async fn record(&self, intent: &NotificationIntent) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO notifications
                     (id, recipient_id, title, body, priority, dedupe_key, created_at, delivered)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(dedupe_key) DO UPDATE SET
                     title = excluded.title,
                     body = excluded.body,
                     priority = excluded.priority",
                params![
                    intent.id.clone(),
                    intent.recipient_id.clone(),
                    intent.title.clone(),
                    intent.body.clone(),
                    intent.priority.as_str(),
                    intent.dedupe_key.clone(),
                    intent.created_at,
                    i32::from(intent.delivered),
                ],
            )
            .await?;
        Ok(())
    }

    async fn undelivered(&self, limit: usize) -> Result<Vec<NotificationIntent>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, recipient_id, title, body, priority, dedupe_key, created_at, delivered
                 FROM notifications
                 WHERE delivered = 0
                 ORDER BY created_at ASC
                 LIMIT ?",
                [limit as i64],
            )
            .await?;

        let mut intents = Vec::new();
        while let Some(row) = rows.next().await? {
            intents.push(Self::parse_intent(&row)?);
        }
        Ok(intents)
    }

    async fn mark_delivered(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.conn
                .execute(
                    "UPDATE notifications SET delivered = 1 WHERE id = ?",
                    [id.as_str()],
                )
                .await?;
        }
        Ok(())
    }

    async fn for_recipient(&self, recipient_id: &str) -> Result<Vec<NotificationIntent>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, recipient_id, title, body, priority, dedupe_key, created_at, delivered
                 FROM notifications
                 WHERE recipient_id = ?
                 ORDER BY created_at ASC",
                [recipient_id],
            )
            .await?;

        let mut intents = Vec::new();
        while let Some(row) = rows.next().await? {
            intents.push(Self::parse_intent(&row)?);
        }
        Ok(intents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Priority;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_and_undelivered() {
        let db = setup().await;
        let repo = LibSqlNotificationRepository::new(db.connection());

        let intent = NotificationIntent::new("p1", "New event", "Picnic", Priority::Normal, "k1");
        repo.record(&intent).await.unwrap();

        let pending = repo.undelivered(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].recipient_id, "p1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_dedupes_by_key() {
        let db = setup().await;
        let repo = LibSqlNotificationRepository::new(db.connection());

        let first = NotificationIntent::new("p1", "New event", "Picnic", Priority::Normal, "k1");
        repo.record(&first).await.unwrap();

        // Same dedupe key, e.g. a reconciliation re-run of the same record
        let second = NotificationIntent::new("p1", "New event!", "Picnic", Priority::High, "k1");
        repo.record(&second).await.unwrap();

        let all = repo.for_recipient("p1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[0].title, "New event!");
        assert_eq!(all[0].priority, Priority::High);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mark_delivered() {
        let db = setup().await;
        let repo = LibSqlNotificationRepository::new(db.connection());

        let intent = NotificationIntent::new("p1", "t", "b", Priority::Normal, "k1");
        repo.record(&intent).await.unwrap();
        repo.mark_delivered(&[intent.id.clone()]).await.unwrap();

        assert!(repo.undelivered(10).await.unwrap().is_empty());
        let all = repo.for_recipient("p1").await.unwrap();
        assert!(all[0].delivered);
    }
}
