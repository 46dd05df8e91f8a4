//! Member record reads
//!
//! The record tables belong to the wider application; this subsystem only
//! reads them (delta sync ranges, reconciliation scans, recipient
//! resolution). `upsert` exists so tests and the reconciliation fixtures can
//! seed records.

use crate::error::Result;
use crate::models::EntityKind;
use libsql::{params, Connection};
use serde::Serialize;

/// One record row as served to delta sync clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordRow {
    pub id: String,
    pub data: serde_json::Value,
    pub updated_at: i64,
}

/// Trait for member record reads (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Records of `kind` with `updated_at >= since`, ascending, capped at `limit`
    async fn changed_since(
        &self,
        kind: EntityKind,
        since: i64,
        limit: usize,
    ) -> Result<Vec<RecordRow>>;

    /// Ids of people marked active
    async fn active_member_ids(&self) -> Result<Vec<String>>;

    /// Ids of active people holding the given role (`coordinator`, `admin`)
    async fn ids_with_role(&self, role: &str) -> Result<Vec<String>>;

    /// Insert or replace a record (test seeding and fixtures)
    async fn upsert(
        &self,
        kind: EntityKind,
        id: &str,
        data: &serde_json::Value,
        updated_at: i64,
    ) -> Result<()>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Set a person's role and active flag (test seeding)
    pub async fn set_person_status(&self, id: &str, role: &str, is_active: bool) -> Result<()> {
        self.conn
            .execute(
                "UPDATE people SET role = ?, is_active = ? WHERE id = ?",
                params![role, i32::from(is_active), id],
            )
            .await?;
        Ok(())
    }
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn changed_since(
        &self,
        kind: EntityKind,
        since: i64,
        limit: usize,
    ) -> Result<Vec<RecordRow>> {
        // Table name comes from the EntityKind enum, never from caller input
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT id, data, updated_at FROM {}
                     WHERE updated_at >= ?
                     ORDER BY updated_at ASC
                     LIMIT ?",
                    kind.table()
                ),
                params![since, limit as i64],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let data: String = row.get(1)?;
            records.push(RecordRow {
                id: row.get(0)?,
                data: serde_json::from_str(&data)?,
                updated_at: row.get(2)?,
            });
        }
        Ok(records)
    }

    async fn active_member_ids(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query("SELECT id FROM people WHERE is_active = 1 ORDER BY id", ())
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    async fn ids_with_role(&self, role: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM people WHERE role = ? AND is_active = 1 ORDER BY id",
                [role],
            )
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    async fn upsert(
        &self,
        kind: EntityKind,
        id: &str,
        data: &serde_json::Value,
        updated_at: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (id, data, updated_at) VALUES (?, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET
                         data = excluded.data,
                         updated_at = excluded.updated_at",
                    kind.table()
                ),
                params![id, serde_json::to_string(data)?, updated_at],
            )
            .await?;
        Ok(())
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
    async fn test_changed_since_window_and_cap() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        for n in 0..5i64 {
            repo.upsert(
                EntityKind::Event,
                &format!("e{n}"),
                &json!({"title": format!("Event {n}")}),
                1000 + n,
            )
            .await
            .unwrap();
        }

        let all = repo.changed_since(EntityKind::Event, 0, 100).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].id, "e0");

        let windowed = repo
            .changed_since(EntityKind::Event, 1003, 100)
            .await
            .unwrap();
        assert_eq!(windowed.len(), 2);

        let capped = repo.changed_since(EntityKind::Event, 0, 3).await.unwrap();
        assert_eq!(capped.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_person_roles() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        for (id, role, active) in [
            ("p1", "member", true),
            ("p2", "coordinator", true),
            ("p3", "admin", true),
            ("p4", "member", false),
        ] {
            repo.upsert(EntityKind::Person, id, &json!({"name": id}), 1000)
                .await
                .unwrap();
            repo.set_person_status(id, role, active).await.unwrap();
        }

        assert_eq!(
            repo.active_member_ids().await.unwrap(),
            vec!["p1", "p2", "p3"]
        );
        assert_eq!(repo.ids_with_role("coordinator").await.unwrap(), vec!["p2"]);
        assert_eq!(repo.ids_with_role("admin").await.unwrap(), vec!["p3"]);
    }
}
