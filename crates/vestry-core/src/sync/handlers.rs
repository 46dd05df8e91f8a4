//! Per-kind type handlers
//!
//! A handler is a pure function of the task payload: it returns the effects
//! to apply, or an error to signal a retryable failure. Handlers must
//! tolerate being invoked more than once for the same logical record (the
//! reconciliation job re-enqueues recently changed records wholesale), which
//! is why every notification effect carries a stable dedupe key.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{EntityKind, Priority, SyncTask};

use super::effect::Effect;

/// Side-effect logic for one entity kind
pub trait TypeHandler: Send + Sync {
    /// Compute the effects for one task, or fail retryably
    fn apply(&self, task: &SyncTask) -> Result<Vec<Effect>>;
}

/// Typed registry mapping entity kinds to their handlers
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EntityKind, Arc<dyn TypeHandler>>,
}

impl HandlerRegistry {
    /// Empty registry (tests register their own handlers)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the production handler for every kind
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(EntityKind::Event, Arc::new(EventHandler));
        registry.register(EntityKind::Group, Arc::new(GroupHandler));
        registry.register(EntityKind::Person, Arc::new(PersonHandler));
        registry.register(EntityKind::FinancialEntry, Arc::new(FinancialEntryHandler));
        registry
    }

    /// Register (or replace) the handler for a kind
    pub fn register(&mut self, kind: EntityKind, handler: Arc<dyn TypeHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Look up the handler for a kind
    #[must_use]
    pub fn get(&self, kind: EntityKind) -> Option<&Arc<dyn TypeHandler>> {
        self.handlers.get(&kind)
    }
}

fn require_record_id(task: &SyncTask) -> Result<String> {
    task.payload
        .get("id")
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| Error::InvalidInput(format!("task {} payload has no record id", task.id)))
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Events: push to the external calendar target; cancellations notify
/// registrants.
pub struct EventHandler;

impl TypeHandler for EventHandler {
    fn apply(&self, task: &SyncTask) -> Result<Vec<Effect>> {
        let id = require_record_id(task)?;
        let mut effects = vec![Effect::ExternalPush {
            target: "calendar",
            resource_id: id.clone(),
            payload: task.payload.clone(),
        }];

        if task.action == "delete" {
            let title = task
                .payload
                .get("title")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("An event");
            for registrant in string_list(task.payload.get("registrant_ids")) {
                effects.push(Effect::Notify {
                    recipient_id: registrant.clone(),
                    title: "Event cancelled".to_string(),
                    body: format!("{title} has been cancelled"),
                    priority: Priority::Normal,
                    dedupe_key: format!("cancelled:event:{id}:{registrant}"),
                });
            }
        }

        Ok(effects)
    }
}

/// Groups: push to the external member directory target.
pub struct GroupHandler;

impl TypeHandler for GroupHandler {
    fn apply(&self, task: &SyncTask) -> Result<Vec<Effect>> {
        let id = require_record_id(task)?;
        Ok(vec![Effect::ExternalPush {
            target: "directory",
            resource_id: id,
            payload: task.payload.clone(),
        }])
    }
}

/// People: push address changes to the external mapping target.
pub struct PersonHandler;

impl TypeHandler for PersonHandler {
    fn apply(&self, task: &SyncTask) -> Result<Vec<Effect>> {
        let id = require_record_id(task)?;
        Ok(vec![Effect::ExternalPush {
            target: "mapping",
            resource_id: id,
            payload: task.payload.clone(),
        }])
    }
}

/// Financial entries: push to the external ledger target. Amounts stay
/// inside the payload; this layer never interprets them (money movement is
/// out of scope for a best-effort propagation layer).
pub struct FinancialEntryHandler;

impl TypeHandler for FinancialEntryHandler {
    fn apply(&self, task: &SyncTask) -> Result<Vec<Effect>> {
        let id = require_record_id(task)?;
        Ok(vec![Effect::ExternalPush {
            target: "ledger",
            resource_id: id,
            payload: task.payload.clone(),
        }])
    }
}
