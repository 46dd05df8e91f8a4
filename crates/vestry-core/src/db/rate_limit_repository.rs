//! Rate limit log repository

use crate::error::Result;
use libsql::{params, Connection};

/// Trait for rate-limit log operations (async)
///
/// The log is append-only and read only as a trailing-window count. Rows are
/// never pruned (known operational gap).
#[allow(async_fn_in_trait)]
pub trait RateLimitRepository {
    /// Count requests for `(ip, endpoint)` at or after `window_start` (Unix ms)
    async fn count_since(&self, ip: &str, endpoint: &str, window_start: i64) -> Result<u64>;

    /// Append one request record
    async fn append(&self, ip: &str, endpoint: &str, timestamp: i64) -> Result<()>;

    /// Timestamp of the oldest request for `(ip, endpoint)` at or after
    /// `window_start`, used to compute a retry-after hint
    async fn oldest_since(
        &self,
        ip: &str,
        endpoint: &str,
        window_start: i64,
    ) -> Result<Option<i64>>;
}

/// libSQL implementation of `RateLimitRepository`
pub struct LibSqlRateLimitRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRateLimitRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl RateLimitRepository for LibSqlRateLimitRepository<'_> {
    async fn count_since(&self, ip: &str, endpoint: &str, window_start: i64) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM rate_limit_log
                 WHERE ip = ? AND endpoint = ? AND timestamp >= ?",
                params![ip, endpoint, window_start],
            )
            .await?;

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn append(&self, ip: &str, endpoint: &str, timestamp: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO rate_limit_log (ip, endpoint, timestamp) VALUES (?, ?, ?)",
                params![ip, endpoint, timestamp],
            )
            .await?;
        Ok(())
    }

    async fn oldest_since(
        &self,
        ip: &str,
        endpoint: &str,
        window_start: i64,
    ) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT MIN(timestamp) FROM rate_limit_log
                 WHERE ip = ? AND endpoint = ? AND timestamp >= ?",
                params![ip, endpoint, window_start],
            )
            .await?;

        match rows.next().await? {
            Some(row) => super::opt_i64(&row, 0),
            None => Ok(None),
        }
    }
}
