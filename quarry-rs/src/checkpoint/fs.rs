//! Filesystem checkpoint store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<run_id>.json           active runs
//! <root>/archive/<run_id>.json   terminal runs
//! ```
//!
//! Saves write a sibling temp file and rename it into place, so a crash
//! mid-save leaves the previous checkpoint intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::errors::{QuarryError, Result};
use crate::workflow::WorkflowState;

use super::{CheckpointEnvelope, CheckpointHandle, CheckpointStore};

const ARCHIVE_DIR: &str = "archive";

#[derive(Debug, Clone)]
pub struct FsCheckpointStore {
    root: PathBuf,
}

impl FsCheckpointStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(ARCHIVE_DIR))
            .await
            .map_err(|e| io_error(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn active_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn archive_path(&self, id: Uuid) -> PathBuf {
        self.root.join(ARCHIVE_DIR).join(format!("{id}.json"))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| QuarryError::Checkpoint(format!("bad checkpoint path {}", path.display())))?;
        let tmp = path.with_file_name(format!(".{file_name}.tmp"));
        fs::write(&tmp, bytes).await.map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, path).await.map_err(|e| io_error(path, e))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> QuarryError {
    QuarryError::Checkpoint(format!("{}: {e}", path.display()))
}

async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

impl CheckpointStore for FsCheckpointStore {
    async fn save(&self, state: &WorkflowState) -> Result<CheckpointHandle> {
        let bytes = CheckpointEnvelope::encode(state)?;
        let archived = self.archive_path(state.run_id);
        let path = if fs::try_exists(&archived).await.unwrap_or(false) {
            archived
        } else {
            self.active_path(state.run_id)
        };
        self.write_atomic(&path, &bytes).await?;
        debug!(run_id = %state.run_id, path = %path.display(), "checkpoint saved");
        Ok(CheckpointHandle(state.run_id))
    }

    async fn load(&self, handle: &CheckpointHandle) -> Result<WorkflowState> {
        if let Some(bytes) = read_if_exists(&self.active_path(handle.0)).await? {
            return CheckpointEnvelope::decode(&bytes);
        }
        match read_if_exists(&self.archive_path(handle.0)).await? {
            Some(bytes) => CheckpointEnvelope::decode(&bytes),
            None => Err(QuarryError::Checkpoint(format!("no checkpoint for run {handle}"))),
        }
    }

    async fn archive(&self, handle: &CheckpointHandle) -> Result<()> {
        let from = self.active_path(handle.0);
        let to = self.archive_path(handle.0);
        match fs::rename(&from, &to).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if fs::try_exists(&to).await.unwrap_or(false) {
                    Ok(())
                } else {
                    Err(QuarryError::Checkpoint(format!("no checkpoint for run {handle}")))
                }
            }
            Err(e) => Err(io_error(&from, e)),
        }
    }

    async fn list_active(&self) -> Result<Vec<CheckpointHandle>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;
        let mut handles = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&self.root, e))? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(id) = Uuid::parse_str(stem) {
                handles.push(CheckpointHandle(id));
            }
        }
        handles.sort();
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::SourceUnit;

    #[tokio::test]
    async fn save_then_load_from_a_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let state = WorkflowState::new("batch", vec![SourceUnit::new("q1", "Know thyself.")], None);
        let handle = FsCheckpointStore::open(dir.path()).await.unwrap().save(&state).await.unwrap();

        let reopened = FsCheckpointStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.load(&handle).await.unwrap(), state);
        assert_eq!(reopened.list_active().await.unwrap(), vec![handle]);
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::open(dir.path()).await.unwrap();
        let state = WorkflowState::new("batch", vec![], None);
        store.save(&state).await.unwrap();
        store.save(&state).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".tmp")), "{names:?}");
    }

    #[tokio::test]
    async fn archived_runs_stay_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::open(dir.path()).await.unwrap();
        let state = WorkflowState::new("batch", vec![], None);
        let handle = store.save(&state).await.unwrap();

        store.archive(&handle).await.unwrap();
        store.archive(&handle).await.unwrap();
        assert!(store.list_active().await.unwrap().is_empty());
        assert_eq!(store.load(&handle).await.unwrap().run_id, state.run_id);
        assert!(dir.path().join("archive").join(format!("{}.json", state.run_id)).exists());
    }

    #[tokio::test]
    async fn corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::open(dir.path()).await.unwrap();
        let id = Uuid::new_v4();
        std::fs::write(dir.path().join(format!("{id}.json")), b"{\"state\": {}}").unwrap();
        let err = store.load(&CheckpointHandle(id)).await.unwrap_err();
        assert!(matches!(err, QuarryError::Checkpoint(_)));
    }
}
