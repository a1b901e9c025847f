use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{PatchworkError, Result};
use crate::patch::Patch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Created,
    Reversal,
}

/// One line of the history log, written once per created patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub patch_id: String,
    pub task_id: String,
    pub creator_agent_id: String,
    pub parent_patch_ids: Vec<String>,
    pub target_files: Vec<String>,
    pub kind: HistoryKind,
    pub recorded_at: DateTime<Utc>,
    pub hostname: String,
}

impl HistoryRecord {
    pub fn for_patch(patch: &Patch, kind: HistoryKind) -> Self {
        Self {
            patch_id: patch.patch_id().to_string(),
            task_id: patch.task_id().to_string(),
            creator_agent_id: patch.creator_agent_id().to_string(),
            parent_patch_ids: patch.parent_patch_ids().to_vec(),
            target_files: patch.target_files().to_vec(),
            kind,
            recorded_at: Utc::now(),
            hostname: hostname::get()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
        }
    }
}

/// Append-only JSON-lines log of every patch ever created.
///
/// Appends take an exclusive file lock so several processes sharing a store
/// never interleave lines.
#[derive(Debug, Clone)]
pub struct PatchHistory {
    path: PathBuf,
}

impl PatchHistory {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &HistoryRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PatchworkError::storage("opening history", e))?;
        let mut lock = RwLock::new(file);
        let mut guard = lock
            .write()
            .map_err(|e| PatchworkError::storage("locking history", e))?;
        guard
            .write_all(line.as_bytes())
            .and_then(|_| guard.flush())
            .map_err(|e| PatchworkError::storage("appending history", e))?;
        Ok(())
    }

    /// All records, oldest first. Unreadable lines are skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<HistoryRecord>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PatchworkError::storage("opening history", e)),
        };

        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| PatchworkError::storage("reading history", e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(line = number + 1, error = %e, "Skipping malformed history line"),
            }
        }
        Ok(records)
    }

    pub fn for_task(&self, task_id: &str) -> Result<Vec<HistoryRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.task_id == task_id)
            .collect())
    }
}
