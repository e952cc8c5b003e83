//! Persistence for jobwright.
//!
//! - **SnapshotFile**: whole-scheduler JSON snapshot, written atomically
//! - **HistoryLog**: append-only JSONL log of completion records

mod history;
mod snapshot;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use history::HistoryLog;
pub use snapshot::{SNAPSHOT_VERSION, SchedulerSnapshot, SnapshotFile};

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Snapshot location; `None` disables snapshots
    pub snapshot_path: Option<PathBuf>,
    /// Seconds between periodic snapshots while running
    pub snapshot_interval_secs: u64,
    /// Completion log location; `None` disables the log
    pub history_path: Option<PathBuf>,
    /// Terminal jobs older than this are garbage collected while running (seconds)
    pub retain_secs: Option<u64>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jobwright");
        Self {
            snapshot_path: Some(base.join("snapshot.json")),
            snapshot_interval_secs: 30,
            history_path: Some(base.join("history.jsonl")),
            retain_secs: Some(24 * 60 * 60),
        }
    }
}

impl PersistenceConfig {
    /// In-memory only: no snapshot, no history, no GC.
    pub fn disabled() -> Self {
        Self {
            snapshot_path: None,
            snapshot_interval_secs: 30,
            history_path: None,
            retain_secs: None,
        }
    }
}
