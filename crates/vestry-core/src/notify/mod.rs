//! Fire-and-forget notification delivery client
//!
//! Hands undelivered notification intents to an external delivery transport
//! over HTTP. Delivery failures are logged and swallowed; intents stay
//! undelivered and are retried on a later flush. When no endpoint is
//! configured, intents simply accumulate for an out-of-band consumer.

use libsql::Connection;
use serde::Serialize;

use crate::db::{LibSqlNotificationRepository, NotificationRepository};
use crate::error::{Error, Result};
use crate::models::NotificationIntent;
use crate::util::{compact_text, is_http_url};

/// Intents handed to the transport per flush
const FLUSH_BATCH: usize = 100;

#[derive(Serialize)]
struct DeliveryBatch<'a> {
    notifications: &'a [NotificationIntent],
}

/// HTTP client for the delivery transport
#[derive(Clone)]
pub struct DeliveryClient {
    endpoint: String,
    client: reqwest::Client,
}

impl DeliveryClient {
    /// Create a client for the given webhook endpoint
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        if !is_http_url(&endpoint) {
            return Err(Error::InvalidInput(
                "delivery endpoint must include http:// or https://".to_string(),
            ));
        }
        Ok(Self {
            endpoint,
            client: reqwest::Client::new(),
        })
    }

    /// Push undelivered intents to the transport, best effort.
    ///
    /// Returns the number of intents marked delivered. Transport errors are
    /// logged and reported as zero, never propagated.
    pub async fn flush(&self, conn: &Connection) -> u64 {
        match self.try_flush(conn).await {
            Ok(delivered) => delivered,
            Err(error) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    error = %compact_text(&error.to_string()),
                    "Notification delivery flush failed"
                );
                0
            }
        }
    }

    async fn try_flush(&self, conn: &Connection) -> Result<u64> {
        let repo = LibSqlNotificationRepository::new(conn);
        let pending = repo.undelivered(FLUSH_BATCH).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&DeliveryBatch {
                notifications: &pending,
            })
            .send()
            .await
            .map_err(|error| Error::Delivery(error.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Delivery(format!(
                "transport returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let ids: Vec<String> = pending.into_iter().map(|intent| intent.id).collect();
        repo.mark_delivered(&ids).await?;

        let delivered = ids.len() as u64;
        tracing::info!(delivered, "Notification batch handed to transport");
        Ok(delivered)
    }
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DeliveryClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
