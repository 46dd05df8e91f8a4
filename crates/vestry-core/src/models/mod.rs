//! Data models for the sync subsystem

mod change;
mod device;
mod log;
mod notification;
mod task;

pub use change::{ChangeEvent, ChangeType};
pub use device::DeviceSyncState;
pub use log::{LogLevel, SyncLogEntry};
pub use notification::{NotificationIntent, Priority};
pub use task::{EntityKind, SyncTask, TaskId, TaskStatus};
