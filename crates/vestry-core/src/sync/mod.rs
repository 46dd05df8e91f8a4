//! Asynchronous synchronization subsystem
//!
//! Event ingestion turns change notifications into immediate side effects
//! and queued tasks; the queue processor drains those tasks through per-kind
//! handlers; delta sync serves incremental pulls to devices; reconciliation
//! re-enqueues recently changed records to recover from missed webhooks.
//! Everything coordinates through the store; there is no shared in-process
//! state between invocations.

mod audit;
mod delta;
mod effect;
mod handlers;
mod ingest;
mod processor;
mod rate_limit;
mod reconcile;

pub use audit::AuditSink;
pub use delta::{delta_sync, DeltaSyncRequest, DeltaSyncResponse};
pub use effect::{apply as apply_effects, Effect, EffectOutcome};
pub use handlers::{
    EventHandler, FinancialEntryHandler, GroupHandler, HandlerRegistry, PersonHandler, TypeHandler,
};
pub use ingest::{ingest, IngestOutcome, IngestSettings};
pub use processor::{process_queue, SweepSummary, TaskOutcome};
pub use rate_limit::{RateLimitMetricsSnapshot, RateLimiter, DEFAULT_LIMIT, DEFAULT_WINDOW};
pub use reconcile::{force_sync, ReconcileOutcome, DEFAULT_WINDOW_MS};

/// Maximum dispatch attempts before a task is terminally failed
pub const MAX_ATTEMPTS: u32 = 3;

/// Maximum tasks claimed per sweep
pub const BATCH_CAP: usize = 50;
