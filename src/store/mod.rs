pub mod backend;
pub mod snapshots;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};
pub use snapshots::{HistoryEntry, SnapshotStore};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Report content as produced upstream. Opaque to the store and scheduler.
pub type ReportPayload = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub week_key: String,
    pub created_at: DateTime<Utc>,
    pub payload: ReportPayload,
}
