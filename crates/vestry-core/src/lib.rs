//! vestry-core - Core library for Vestry sync
//!
//! This crate contains the shared models, database layer, and sync
//! subsystem (queue, handlers, ingestion, delta sync, reconciliation)
//! used by the Vestry API surface.

pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{ChangeEvent, ChangeType, EntityKind, SyncTask, TaskId, TaskStatus};
