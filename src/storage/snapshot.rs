//! Scheduler snapshot and its on-disk file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::Job;
use crate::error::{Result, SchedulerError};

/// Format version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to rebuild a scheduler after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub version: u32,
    #[serde(default)]
    pub saved_at: i64,
    pub jobs: Vec<Job>,
    /// Parameters of the priority model; `null` for models without state
    #[serde(default)]
    pub priority_model_state: serde_json::Value,
    /// Next queue sequence number
    #[serde(default)]
    pub queue_sequence: u64,
    #[serde(default)]
    pub retired_ids: Vec<String>,
}

impl SchedulerSnapshot {
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: 0,
            jobs: Vec::new(),
            priority_model_state: serde_json::Value::Null,
            queue_sequence: 0,
            retired_ids: Vec::new(),
        }
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }
}

/// Snapshot persisted as pretty JSON.
///
/// Writes go to a sibling temp file which is then renamed over the target, so
/// a reader never sees a partial snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write the snapshot atomically.
    pub fn save(&self, snapshot: &SchedulerSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.temp_path();
        {
            let mut file = File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, snapshot)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = %self.path.display(), jobs = snapshot.jobs.len(), "Snapshot saved");
        Ok(())
    }

    /// Read the snapshot, or `None` if the file does not exist.
    pub fn load(&self) -> Result<Option<SchedulerSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let snapshot: SchedulerSnapshot = serde_json::from_str(&content)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SchedulerError::Storage(format!(
                "snapshot {} has version {}, newest supported is {}",
                self.path.display(),
                snapshot.version,
                SNAPSHOT_VERSION
            )));
        }
        Ok(Some(snapshot))
    }
}
