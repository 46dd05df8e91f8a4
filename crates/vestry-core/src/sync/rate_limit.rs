//! Trailing-window request rate limiter
//!
//! Fixed trailing window per `(ip, endpoint)` over the persisted
//! `rate_limit_log`: count recent requests, reject when the threshold is
//! reached, otherwise append the current request. The check is
//! read-then-write, not atomic, so concurrent requests from one key can
//! transiently exceed the threshold by a small margin. That is acceptable
//! approximate limiting, not a hard guarantee.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use libsql::Connection;

use crate::db::{LibSqlRateLimitRepository, RateLimitRepository};
use crate::error::{Error, Result};
use crate::util::now_millis;

/// Default trailing window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default requests admitted per key per window
pub const DEFAULT_LIMIT: u64 = 100;

#[derive(Default)]
struct RateLimitMetrics {
    allowed: AtomicU64,
    limited: AtomicU64,
}

/// Counters exposed on the health endpoint
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub allowed: u64,
    pub limited: u64,
}

/// Store-backed fixed-window limiter
#[derive(Clone)]
pub struct RateLimiter {
    window: Duration,
    limit: u64,
    metrics: Arc<RateLimitMetrics>,
}

impl RateLimiter {
    /// Create a limiter with the given window and per-window threshold
    #[must_use]
    pub fn new(window: Duration, limit: u64) -> Self {
        Self {
            window,
            limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    /// Gate one request, appending it to the log when admitted
    pub async fn check(&self, conn: &Connection, ip: &str, endpoint: &str) -> Result<()> {
        self.check_at(conn, ip, endpoint, now_millis()).await
    }

    /// `check` with an explicit clock, for tests
    pub async fn check_at(
        &self,
        conn: &Connection,
        ip: &str,
        endpoint: &str,
        now_ms: i64,
    ) -> Result<()> {
        let repo = LibSqlRateLimitRepository::new(conn);
        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        let window_start = now_ms - window_ms;

        let count = repo.count_since(ip, endpoint, window_start).await?;
        if count >= self.limit {
            let oldest = repo
                .oldest_since(ip, endpoint, window_start)
                .await?
                .unwrap_or(now_ms);
            let retry_after_secs =
                u64::try_from((oldest + window_ms - now_ms).max(0)).unwrap_or_default() / 1000;
            self.metrics.limited.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(ip, endpoint, count, retry_after_secs, "Rate limit exceeded");
            return Err(Error::RateLimited { retry_after_secs });
        }

        repo.append(ip, endpoint, now_ms).await?;
        self.metrics.allowed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Snapshot of the allowed/limited counters
    #[must_use]
    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            allowed: self.metrics.allowed.load(Ordering::Relaxed),
            limited: self.metrics.limited.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_101st_request_in_window_rejected() {
        let db = setup().await;
        let conn = db.connection();
        let limiter = RateLimiter::new(Duration::from_secs(60), 100);

        for n in 0..100 {
            limiter
                .check_at(conn, "1.2.3.4", "/v1/webhook", 1000 + n)
                .await
                .unwrap();
        }

        let err = limiter
            .check_at(conn, "1.2.3.4", "/v1/webhook", 1200)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.allowed, 100);
        assert_eq!(metrics.limited, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_requests_outside_window_do_not_count() {
        let db = setup().await;
        let conn = db.connection();
        let limiter = RateLimiter::new(Duration::from_secs(60), 100);

        // 100 requests spread across more than the window duration: the
        // oldest always falls out before the threshold is reached.
        let spacing = 61_000 / 100;
        for n in 0..100i64 {
            limiter
                .check_at(conn, "1.2.3.4", "/v1/webhook", n * spacing)
                .await
                .unwrap();
        }

        // Still admitted: the window has rolled past the earliest entries
        limiter
            .check_at(conn, "1.2.3.4", "/v1/webhook", 100 * spacing)
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_keys_are_independent() {
        let db = setup().await;
        let conn = db.connection();
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);

        limiter.check_at(conn, "1.2.3.4", "/a", 1000).await.unwrap();
        limiter.check_at(conn, "1.2.3.4", "/a", 1001).await.unwrap();
        assert!(limiter.check_at(conn, "1.2.3.4", "/a", 1002).await.is_err());

        // Different endpoint and different ip both unaffected
        limiter.check_at(conn, "1.2.3.4", "/b", 1003).await.unwrap();
        limiter.check_at(conn, "5.6.7.8", "/a", 1004).await.unwrap();
    }
}
