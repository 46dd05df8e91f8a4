//! Intended side effects and their central application
//!
//! Handlers and ingestion rules do no I/O themselves; they return a list of
//! `Effect`s and this module applies them in one place. That keeps the
//! at-least-once semantics (and the idempotency that makes them safe) out of
//! the per-kind logic.

use libsql::Connection;

use crate::db::{
    GrantRepository, LibSqlGrantRepository, LibSqlNotificationRepository, LibSqlTaskRepository,
    NotificationRepository, SyncTaskRepository,
};
use crate::error::Result;
use crate::models::{EntityKind, LogLevel, NotificationIntent, Priority, SyncLogEntry};

use super::audit::AuditSink;

/// One intended side effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Record a notification for later delivery, deduplicated by key
    Notify {
        recipient_id: String,
        title: String,
        body: String,
        priority: Priority,
        dedupe_key: String,
    },
    /// Enqueue a new sync task for asynchronous propagation
    EnqueueTask {
        kind: EntityKind,
        action: String,
        payload: serde_json::Value,
    },
    /// Append an audit entry (failures swallowed by the sink)
    Audit {
        kind: EntityKind,
        action: String,
        resource_id: String,
        level: LogLevel,
        payload: serde_json::Value,
    },
    /// Push a record to an external synchronization target.
    ///
    /// Delivery transports are out-of-scope collaborators; at this layer the
    /// push is a structured log line.
    ExternalPush {
        target: &'static str,
        resource_id: String,
        payload: serde_json::Value,
    },
    /// Grant a resource-scoped capability
    Grant {
        holder_id: String,
        capability: String,
        resource_id: String,
    },
    /// Revoke all of a holder's grants on a resource
    Revoke {
        holder_id: String,
        resource_id: String,
    },
}

/// Counts of applied effects
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct EffectOutcome {
    pub notifications: u64,
    pub tasks_enqueued: u64,
    pub grants_changed: u64,
    pub external_pushes: u64,
}

/// Apply a list of effects against the store.
///
/// Store errors propagate so the caller can count the attempt as failed and
/// retry; effects applied before the error are not rolled back (documented
/// at-least-once limitation). Audit effects never fail the caller.
pub async fn apply(
    conn: &Connection,
    actor_id: Option<&str>,
    effects: Vec<Effect>,
) -> Result<EffectOutcome> {
    let notifications = LibSqlNotificationRepository::new(conn);
    let tasks = LibSqlTaskRepository::new(conn);
    let grants = LibSqlGrantRepository::new(conn);
    let audit = AuditSink::new(conn);

    let mut outcome = EffectOutcome::default();
    for effect in effects {
        match effect {
            Effect::Notify {
                recipient_id,
                title,
                body,
                priority,
                dedupe_key,
            } => {
                let intent =
                    NotificationIntent::new(recipient_id, title, body, priority, dedupe_key);
                notifications.record(&intent).await?;
                outcome.notifications += 1;
            }
            Effect::EnqueueTask {
                kind,
                action,
                payload,
            } => {
                tasks.enqueue(kind, &action, &payload).await?;
                outcome.tasks_enqueued += 1;
            }
            Effect::Audit {
                kind,
                action,
                resource_id,
                level,
                payload,
            } => {
                let entry = SyncLogEntry::new(
                    kind.as_str(),
                    action,
                    resource_id,
                    payload,
                    level,
                    actor_id.map(ToString::to_string),
                );
                audit.record(&entry).await;
            }
            Effect::ExternalPush {
                target,
                resource_id,
                payload,
            } => {
                tracing::info!(
                    target_system = target,
                    resource_id = %resource_id,
                    payload_bytes = payload.to_string().len(),
                    "External sync push"
                );
                outcome.external_pushes += 1;
            }
            Effect::Grant {
                holder_id,
                capability,
                resource_id,
            } => {
                grants.grant(&holder_id, &capability, &resource_id).await?;
                outcome.grants_changed += 1;
            }
            Effect::Revoke {
                holder_id,
                resource_id,
            } => {
                outcome.grants_changed +=
                    grants.revoke_for_resource(&holder_id, &resource_id).await?;
            }
        }
    }

    Ok(outcome)
}
