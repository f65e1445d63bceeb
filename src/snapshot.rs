//! The persistence collaborator contract.
//!
//! The board is persisted as one whole snapshot: load on startup, save
//! after every successful mutation. The JSON adapter is the default
//! durable form; the in-memory adapter backs tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::board::models::Task;
use crate::learning::models::{AgentLearningProfile, CodebaseConvention, ProjectLesson};
use crate::sprint::models::Sprint;

/// Complete serializable board state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub sprints: Vec<Sprint>,
    #[serde(default)]
    pub profiles: Vec<AgentLearningProfile>,
    #[serde(default)]
    pub lessons: Vec<ProjectLesson>,
    #[serde(default)]
    pub conventions: Vec<CodebaseConvention>,
    pub saved_at: DateTime<Utc>,
}

/// Whole-snapshot load/save seam.
pub trait SnapshotStore {
    /// Read the last saved snapshot; `None` when nothing was ever saved.
    fn load(&self) -> Result<Option<BoardSnapshot>>;
    fn save(&self, snapshot: &BoardSnapshot) -> Result<()>;
}

/// Pretty-printed JSON file, one snapshot per board.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn load(&self) -> Result<Option<BoardSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read snapshot at {}", self.path.display()))?;
        let snapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot at {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &BoardSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json =
            serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write snapshot at {}", self.path.display()))?;
        Ok(())
    }
}

/// Keeps the serialized snapshot in memory. The round trip through JSON is
/// deliberate so tests exercise the same serde path as the file store.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many bytes the last save produced, for assertions.
    pub fn saved_len(&self) -> usize {
        self.slot
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|c| c.len()))
            .unwrap_or(0)
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<BoardSnapshot>> {
        let slot = self
            .slot
            .lock()
            .map_err(|e| anyhow::anyhow!("snapshot slot poisoned: {}", e))?;
        match slot.as_ref() {
            Some(content) => Ok(Some(
                serde_json::from_str(content).context("Failed to parse in-memory snapshot")?,
            )),
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &BoardSnapshot) -> Result<()> {
        let json =
            serde_json::to_string(snapshot).context("Failed to serialize in-memory snapshot")?;
        let mut slot = self
            .slot
            .lock()
            .map_err(|e| anyhow::anyhow!("snapshot slot poisoned: {}", e))?;
        *slot = Some(json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::{NewTask, Task};
    use crate::sprint::models::{NewSprint, Sprint};
    use tempfile::tempdir;

    fn sample_snapshot() -> BoardSnapshot {
        let now = Utc::now();
        BoardSnapshot {
            tasks: vec![Task::create(
                NewTask {
                    title: "persisted".into(),
                    ..NewTask::default()
                },
                now,
            )],
            sprints: vec![Sprint::create(
                NewSprint {
                    goal: "persisted goal".into(),
                    ..NewSprint::default()
                },
                now,
            )],
            profiles: Vec::new(),
            lessons: Vec::new(),
            conventions: Vec::new(),
            saved_at: now,
        }
    }

    #[test]
    fn json_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = JsonSnapshotStore::new(&dir.path().join("board.json"));

        assert!(store.load().unwrap().is_none());

        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn json_store_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let store = JsonSnapshotStore::new(&dir.path().join("nested/state/board.json"));
        store.save(&sample_snapshot()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn json_store_rejects_corrupt_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("board.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonSnapshotStore::new(&path);
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemorySnapshotStore::new();
        assert!(store.load().unwrap().is_none());

        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();
        assert!(store.saved_len() > 0);
        assert_eq!(store.load().unwrap().unwrap(), snapshot);
    }

    #[test]
    fn snapshot_tolerates_missing_optional_sections() {
        let json = format!(r#"{{"tasks": [], "saved_at": "{}"}}"#, Utc::now().to_rfc3339());
        let snapshot: BoardSnapshot = serde_json::from_str(&json).unwrap();
        assert!(snapshot.sprints.is_empty());
        assert!(snapshot.lessons.is_empty());
    }
}
