//! Event ingestion
//!
//! Converts one normalized change notification into immediate side effects
//! (notification intents, capability grant changes) and a queued propagation
//! task. Multiple rules may fire for one event; effects applied before a
//! later failure are not rolled back.

use libsql::Connection;
use serde::Serialize;

use crate::db::{LibSqlRecordRepository, RecordRepository};
use crate::error::Result;
use crate::models::{ChangeEvent, ChangeType, EntityKind, LogLevel, Priority, SyncLogEntry};

use super::audit::AuditSink;
use super::effect::{self, Effect};

/// Capabilities granted to the responsible person of a group
const GROUP_LEADER_CAPABILITIES: [&str; 2] = ["manage_group", "message_members"];

/// Capabilities granted to the coordinator of an event
const EVENT_COORDINATOR_CAPABILITIES: [&str; 2] = ["manage_event", "message_attendees"];

/// Tunables for the side-effect rules
#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    /// Monetary entries at or above this amount (minor units) page admins
    pub high_value_threshold: i64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            // 10,000.00 in minor units
            high_value_threshold: 1_000_000,
        }
    }
}

/// Counts returned to the webhook caller
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub rules_fired: u64,
    pub notifications: u64,
    pub tasks_enqueued: u64,
}

/// Ingest one change event: evaluate rules, apply effects, audit the call.
pub async fn ingest(
    conn: &Connection,
    settings: &IngestSettings,
    event: &ChangeEvent,
    actor_id: Option<&str>,
) -> Result<IngestOutcome> {
    let audit = AuditSink::new(conn);
    let resource_id = event.record_id().unwrap_or("unknown").to_string();

    let result = run_rules(conn, settings, event).await;

    let (level, outcome_json) = match &result {
        Ok(outcome) => (LogLevel::Info, serde_json::json!({ "outcome": outcome })),
        Err(error) => (
            LogLevel::Error,
            serde_json::json!({ "error": error.to_string() }),
        ),
    };
    let mut snapshot = serde_json::json!({ "record": event.record });
    if let Some(extra) = snapshot.as_object_mut() {
        extra.insert("result".to_string(), outcome_json);
    }
    audit
        .record(&SyncLogEntry::new(
            event.entity_kind.as_str(),
            format!("{}:{resource_id}", event.change_type),
            resource_id,
            snapshot,
            level,
            actor_id.map(ToString::to_string),
        ))
        .await;

    result
}

async fn run_rules(
    conn: &Connection,
    settings: &IngestSettings,
    event: &ChangeEvent,
) -> Result<IngestOutcome> {
    let mut effects = Vec::new();
    let mut rules_fired = 0;

    let produced = [
        rule_created_notifies_coordinators(conn, settings, event).await?,
        rule_start_time_change_notifies_interested(conn, settings, event).await?,
        rule_registration_open_broadcasts(conn, settings, event).await?,
        rule_ownership_change_moves_grants(conn, settings, event).await?,
        rule_high_value_entry_pages_admins(conn, settings, event).await?,
    ];
    for rule_effects in produced {
        if !rule_effects.is_empty() {
            rules_fired += 1;
            effects.extend(rule_effects);
        }
    }

    // Every change is also propagated asynchronously
    effects.push(Effect::EnqueueTask {
        kind: event.entity_kind,
        action: event.change_type.as_str().to_string(),
        payload: event.record.clone(),
    });

    let applied = effect::apply(conn, None, effects).await?;
    Ok(IngestOutcome {
        rules_fired,
        notifications: applied.notifications,
        tasks_enqueued: applied.tasks_enqueued,
    })
}

fn record_title(event: &ChangeEvent) -> &str {
    event
        .field("title")
        .or_else(|| event.field("name"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("A record")
}

/// Rule 1: entity created -> notify holders of the coordination role.
async fn rule_created_notifies_coordinators(
    conn: &Connection,
    _settings: &IngestSettings,
    event: &ChangeEvent,
) -> Result<Vec<Effect>> {
    if event.change_type != ChangeType::Insert {
        return Ok(Vec::new());
    }
    let Some(id) = event.record_id() else {
        return Ok(Vec::new());
    };

    let records = LibSqlRecordRepository::new(conn);
    let coordinators = records.ids_with_role("coordinator").await?;
    let kind = event.entity_kind;
    let title = record_title(event);

    Ok(coordinators
        .into_iter()
        .map(|recipient| Effect::Notify {
            recipient_id: recipient.clone(),
            title: format!("New {kind}"),
            body: format!("{title} was created"),
            priority: Priority::Normal,
            dedupe_key: format!("created:{kind}:{id}:{recipient}"),
        })
        .collect())
}

/// Rule 2: scheduled start time changed -> notify the parties listed on
/// the pre-change record (falling back to the current list).
async fn rule_start_time_change_notifies_interested(
    _conn: &Connection,
    _settings: &IngestSettings,
    event: &ChangeEvent,
) -> Result<Vec<Effect>> {
    if event.change_type != ChangeType::Update || !event.field_changed("starts_at") {
        return Ok(Vec::new());
    }
    let Some(id) = event.record_id() else {
        return Ok(Vec::new());
    };

    // The pre-change list is who cared about the old time; someone removed
    // in the same update still gets told the schedule moved.
    let interested = event
        .previous_field("registrant_ids")
        .or_else(|| event.field("registrant_ids"))
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let kind = event.entity_kind;
    let title = record_title(event);
    let new_start = event
        .field("starts_at")
        .map(ToString::to_string)
        .unwrap_or_default();

    Ok(interested
        .into_iter()
        .map(|recipient| Effect::Notify {
            recipient_id: recipient.to_string(),
            title: "Schedule change".to_string(),
            body: format!("{title} now starts at a different time"),
            priority: Priority::Normal,
            dedupe_key: format!("time_changed:{kind}:{id}:{recipient}:{new_start}"),
        })
        .collect())
}

/// Rule 3: `registrations_open` flips false -> true -> broadcast to all
/// active members.
async fn rule_registration_open_broadcasts(
    conn: &Connection,
    _settings: &IngestSettings,
    event: &ChangeEvent,
) -> Result<Vec<Effect>> {
    if event.change_type != ChangeType::Update {
        return Ok(Vec::new());
    }
    let was_open = event
        .previous_field("registrations_open")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    let is_open = event
        .field("registrations_open")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    if was_open || !is_open {
        return Ok(Vec::new());
    }
    let Some(id) = event.record_id() else {
        return Ok(Vec::new());
    };

    let records = LibSqlRecordRepository::new(conn);
    let members = records.active_member_ids().await?;
    let kind = event.entity_kind;
    let title = record_title(event);

    Ok(members
        .into_iter()
        .map(|recipient| Effect::Notify {
            recipient_id: recipient.clone(),
            title: "Registration open".to_string(),
            body: format!("Registration for {title} is now open"),
            priority: Priority::Normal,
            dedupe_key: format!("registration_open:{kind}:{id}:{recipient}"),
        })
        .collect())
}

/// Rule 4: ownership field changed -> move resource-scoped capability
/// grants from the former holder to the new one.
async fn rule_ownership_change_moves_grants(
    _conn: &Connection,
    _settings: &IngestSettings,
    event: &ChangeEvent,
) -> Result<Vec<Effect>> {
    let (field, capabilities): (&str, &[&str]) = match event.entity_kind {
        EntityKind::Group => ("leader_id", &GROUP_LEADER_CAPABILITIES),
        EntityKind::Event => ("coordinator_id", &EVENT_COORDINATOR_CAPABILITIES),
        EntityKind::Person | EntityKind::FinancialEntry => return Ok(Vec::new()),
    };
    if event.change_type != ChangeType::Update || !event.field_changed(field) {
        return Ok(Vec::new());
    }
    let Some(id) = event.record_id() else {
        return Ok(Vec::new());
    };

    let mut effects = Vec::new();
    if let Some(former) = event
        .previous_field(field)
        .and_then(serde_json::Value::as_str)
    {
        effects.push(Effect::Revoke {
            holder_id: former.to_string(),
            resource_id: id.to_string(),
        });
    }
    if let Some(new_holder) = event.field(field).and_then(serde_json::Value::as_str) {
        for capability in capabilities {
            effects.push(Effect::Grant {
                holder_id: new_holder.to_string(),
                capability: (*capability).to_string(),
                resource_id: id.to_string(),
            });
        }
    }

    Ok(effects)
}

/// Rule 5: monetary entry created at or above the threshold -> page admins
/// with elevated priority.
async fn rule_high_value_entry_pages_admins(
    conn: &Connection,
    settings: &IngestSettings,
    event: &ChangeEvent,
) -> Result<Vec<Effect>> {
    if event.entity_kind != EntityKind::FinancialEntry || event.change_type != ChangeType::Insert {
        return Ok(Vec::new());
    }
    let amount = event
        .field("amount")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0);
    if amount < settings.high_value_threshold {
        return Ok(Vec::new());
    }
    let Some(id) = event.record_id() else {
        return Ok(Vec::new());
    };

    let records = LibSqlRecordRepository::new(conn);
    let admins = records.ids_with_role("admin").await?;

    Ok(admins
        .into_iter()
        .map(|recipient| Effect::Notify {
            recipient_id: recipient.clone(),
            title: "High-value entry".to_string(),
            body: format!("A financial entry of {amount} minor units was recorded"),
            priority: Priority::High,
            dedupe_key: format!("high_value:{id}:{recipient}"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        Database, GrantRepository, LibSqlGrantRepository, LibSqlNotificationRepository,
        LibSqlTaskRepository, LogRepository, NotificationRepository, SyncTaskRepository,
    };
    use crate::db::{LibSqlLogRepository, LibSqlRecordRepository};
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    async fn seed_person(conn: &libsql::Connection, id: &str, role: &str, active: bool) {
        let records = LibSqlRecordRepository::new(conn);
        records
            .upsert(EntityKind::Person, id, &json!({"name": id}), 1000)
            .await
            .unwrap();
        records.set_person_status(id, role, active).await.unwrap();
    }

    fn update_event(record: serde_json::Value, previous: serde_json::Value) -> ChangeEvent {
        ChangeEvent {
            change_type: ChangeType::Update,
            entity_kind: EntityKind::Event,
            record,
            previous_record: Some(previous),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_notifies_coordinators_and_enqueues() {
        let db = setup().await;
        let conn = db.connection();
        seed_person(conn, "c1", "coordinator", true).await;
        seed_person(conn, "c2", "coordinator", true).await;
        seed_person(conn, "m1", "member", true).await;

        let event = ChangeEvent {
            change_type: ChangeType::Insert,
            entity_kind: EntityKind::Event,
            record: json!({"id": "e1", "title": "Potluck"}),
            previous_record: None,
        };

        let outcome = ingest(conn, &IngestSettings::default(), &event, None)
            .await
            .unwrap();
        assert_eq!(outcome.rules_fired, 1);
        assert_eq!(outcome.notifications, 2);
        assert_eq!(outcome.tasks_enqueued, 1);

        let tasks = LibSqlTaskRepository::new(conn);
        assert_eq!(tasks.status_counts(0).await.unwrap().pending, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_registration_open_broadcasts_to_active_members() {
        let db = setup().await;
        let conn = db.connection();
        seed_person(conn, "m1", "member", true).await;
        seed_person(conn, "m2", "member", true).await;
        seed_person(conn, "m3", "member", false).await;

        let event = update_event(
            json!({"id": "e1", "title": "Retreat", "registrations_open": true}),
            json!({"id": "e1", "title": "Retreat", "registrations_open": false}),
        );

        let outcome = ingest(conn, &IngestSettings::default(), &event, None)
            .await
            .unwrap();
        assert_eq!(outcome.notifications, 2);

        // One audit entry referencing the event id
        let log = LibSqlLogRepository::new(conn);
        let recent = log.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent[0].action.contains("e1"));

        let notifications = LibSqlNotificationRepository::new(conn);
        assert_eq!(notifications.for_recipient("m1").await.unwrap().len(), 1);
        assert_eq!(notifications.for_recipient("m2").await.unwrap().len(), 1);
        assert!(notifications.for_recipient("m3").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_registration_already_open_does_not_broadcast() {
        let db = setup().await;
        let conn = db.connection();
        seed_person(conn, "m1", "member", true).await;

        let event = update_event(
            json!({"id": "e1", "registrations_open": true}),
            json!({"id": "e1", "registrations_open": true}),
        );

        let outcome = ingest(conn, &IngestSettings::default(), &event, None)
            .await
            .unwrap();
        assert_eq!(outcome.notifications, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_time_change_notifies_registrants() {
        let db = setup().await;
        let conn = db.connection();

        let event = update_event(
            json!({"id": "e1", "title": "Choir", "starts_at": 2000, "registrant_ids": ["p1", "p2"]}),
            json!({"id": "e1", "title": "Choir", "starts_at": 1000, "registrant_ids": ["p1", "p2"]}),
        );

        let outcome = ingest(conn, &IngestSettings::default(), &event, None)
            .await
            .unwrap();
        assert_eq!(outcome.notifications, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_time_change_notifies_removed_registrant() {
        let db = setup().await;
        let conn = db.connection();

        // p2 was dropped in the same update; they still cared about the
        // old time and get the schedule-change notice.
        let event = update_event(
            json!({"id": "e1", "title": "Choir", "starts_at": 2000, "registrant_ids": ["p1"]}),
            json!({"id": "e1", "title": "Choir", "starts_at": 1000, "registrant_ids": ["p1", "p2"]}),
        );

        let outcome = ingest(conn, &IngestSettings::default(), &event, None)
            .await
            .unwrap();
        assert_eq!(outcome.notifications, 2);

        let notifications = LibSqlNotificationRepository::new(conn);
        assert_eq!(notifications.for_recipient("p2").await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_leader_change_moves_grants() {
        let db = setup().await;
        let conn = db.connection();
        let grants = LibSqlGrantRepository::new(conn);
        grants.grant("old-leader", "manage_group", "g1").await.unwrap();
        grants
            .grant("old-leader", "message_members", "g1")
            .await
            .unwrap();

        let event = ChangeEvent {
            change_type: ChangeType::Update,
            entity_kind: EntityKind::Group,
            record: json!({"id": "g1", "name": "Youth", "leader_id": "new-leader"}),
            previous_record: Some(json!({"id": "g1", "name": "Youth", "leader_id": "old-leader"})),
        };

        ingest(conn, &IngestSettings::default(), &event, None)
            .await
            .unwrap();

        assert!(grants.capabilities("old-leader", "g1").await.unwrap().is_empty());
        assert_eq!(
            grants.capabilities("new-leader", "g1").await.unwrap(),
            vec!["manage_group", "message_members"]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_high_value_entry_pages_admins() {
        let db = setup().await;
        let conn = db.connection();
        seed_person(conn, "a1", "admin", true).await;

        let event = ChangeEvent {
            change_type: ChangeType::Insert,
            entity_kind: EntityKind::FinancialEntry,
            record: json!({"id": "f1", "amount": 2_000_000}),
            previous_record: None,
        };

        let outcome = ingest(conn, &IngestSettings::default(), &event, None)
            .await
            .unwrap();
        assert_eq!(outcome.notifications, 1);

        let notifications = LibSqlNotificationRepository::new(conn);
        let intents = notifications.for_recipient("a1").await.unwrap();
        assert_eq!(intents[0].priority, crate::models::Priority::High);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_small_entry_does_not_page() {
        let db = setup().await;
        let conn = db.connection();
        seed_person(conn, "a1", "admin", true).await;

        let event = ChangeEvent {
            change_type: ChangeType::Insert,
            entity_kind: EntityKind::FinancialEntry,
            record: json!({"id": "f2", "amount": 500}),
            previous_record: None,
        };

        let outcome = ingest(conn, &IngestSettings::default(), &event, None)
            .await
            .unwrap();
        assert_eq!(outcome.notifications, 0);
        // The propagation task is still enqueued
        assert_eq!(outcome.tasks_enqueued, 1);
    }
}
