//! File-backed session state persistence.
//!
//! Reads and writes the whole `SessionState` aggregate at
//! `<project>/.goodvibes/state/hooks-state.json`. There is no partial update
//! protocol: every hook invocation loads everything, mutates its slice, and
//! writes everything back.
//!
//! # Defensive Design
//!
//! State files can be hand-edited, truncated by a crash of an older writer, or
//! written by a newer version. `load` therefore never fails:
//! - Missing file → fresh default state
//! - Empty file → fresh default state
//! - Corrupt JSON → fresh default state, warning logged
//! - Missing fields → serde defaults
//!
//! Use [`StateStore::try_load`] when a strict answer is needed.
//!
//! # Atomic Writes
//!
//! Uses temp file + rename so a reader never observes a half-written file.
//! Two processes saving concurrently still race: the later rename wins. Hold a
//! [`StateLock`] around load → mutate → save to serialize invocations.

use fs_err as fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;

use crate::error::{Result, VibesError};
use crate::storage::StorageConfig;

use super::lock::StateLock;
use super::types::SessionState;

/// Handle on the state file of one project.
#[derive(Debug, Clone)]
pub struct StateStore {
    file_path: PathBuf,
}

impl StateStore {
    pub fn new(file_path: &Path) -> Self {
        StateStore {
            file_path: file_path.to_path_buf(),
        }
    }

    pub fn for_project(storage: &StorageConfig) -> Self {
        Self::new(&storage.state_file())
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Acquires the advisory lock guarding this state file.
    pub fn lock(&self, timeout: Duration) -> Option<StateLock> {
        StateLock::acquire(&self.file_path, timeout)
    }

    /// Loads the aggregate, falling back to a fresh default on any problem.
    pub fn load(&self) -> SessionState {
        match self.try_load() {
            Ok(Some(state)) => state,
            Ok(None) => {
                tracing::debug!(path = %self.file_path.display(), "No state file; starting fresh");
                SessionState::default()
            }
            Err(err) => {
                tracing::warn!(error = %err, "Unreadable state file; starting fresh");
                SessionState::default()
            }
        }
    }

    /// Strict load. `Ok(None)` when the file does not exist or is empty.
    pub fn try_load(&self) -> Result<Option<SessionState>> {
        let content = match fs::read_to_string(&self.file_path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(VibesError::io("read state file", err)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str::<SessionState>(&content)
            .map(Some)
            .map_err(|source| VibesError::StateMalformed {
                path: self.file_path.clone(),
                source,
            })
    }

    /// Writes the full aggregate atomically and bumps its revision.
    ///
    /// On error the in-memory revision is left untouched and the on-disk file
    /// is unchanged.
    pub fn save(&self, state: &mut SessionState) -> Result<()> {
        let base_revision = state.revision;
        let on_disk = self.disk_revision().unwrap_or(0);
        if on_disk > base_revision {
            tracing::warn!(
                on_disk,
                base_revision,
                "State file changed since load; overwriting (last write wins)"
            );
        }

        let mut next = state.clone();
        next.revision = base_revision.max(on_disk) + 1;

        let content = serde_json::to_string_pretty(&next)
            .map_err(|e| VibesError::json("serialize state", e))?;

        let parent_dir = self
            .file_path
            .parent()
            .ok_or_else(|| VibesError::StatePathInvalid(self.file_path.clone()))?;
        fs::create_dir_all(parent_dir).map_err(|e| VibesError::io("create state dir", e))?;

        let mut temp_file =
            NamedTempFile::new_in(parent_dir).map_err(|e| VibesError::io("create temp file", e))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|e| VibesError::io("write temp state file", e))?;
        temp_file
            .flush()
            .map_err(|e| VibesError::io("flush temp state file", e))?;
        temp_file
            .persist(&self.file_path)
            .map_err(|e| VibesError::io("persist state file", e.error))?;

        state.revision = next.revision;
        tracing::debug!(revision = state.revision, "State saved");
        Ok(())
    }

    fn disk_revision(&self) -> Option<u64> {
        let content = fs::read_to_string(&self.file_path).ok()?;
        let value: serde_json::Value = serde_json::from_str(&content).ok()?;
        value.get("revision").and_then(|r| r.as_u64())
    }
}
