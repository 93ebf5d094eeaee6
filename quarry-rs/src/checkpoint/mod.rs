//! Durable checkpoints of [`WorkflowState`].
//!
//! A checkpoint is the only thing that crosses the review suspension point
//! and process restarts. States are stored inside a [`CheckpointEnvelope`]
//! carrying an explicit `kind` discriminant and a format version: a payload
//! with a missing or unknown discriminant fails to load instead of being
//! guessed at.
//!
//! # Implementations
//! - [`memory::MemoryCheckpointStore`]: process-local, for tests.
//! - [`fs::FsCheckpointStore`]: one JSON file per run under a directory.

pub mod fs;
pub mod memory;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{QuarryError, Result};
use crate::workflow::WorkflowState;

pub use fs::FsCheckpointStore;
pub use memory::MemoryCheckpointStore;

/// Current envelope format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Opaque reference to a saved run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointHandle(pub Uuid);

impl fmt::Display for CheckpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointEnvelope {
    WorkflowState {
        version: u32,
        saved_at: DateTime<Utc>,
        state: Box<WorkflowState>,
    },
}

impl CheckpointEnvelope {
    pub fn encode(state: &WorkflowState) -> Result<Vec<u8>> {
        let envelope = CheckpointEnvelope::WorkflowState {
            version: CHECKPOINT_VERSION,
            saved_at: Utc::now(),
            state: Box::new(state.clone()),
        };
        Ok(serde_json::to_vec_pretty(&envelope)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<WorkflowState> {
        let envelope: CheckpointEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| QuarryError::Checkpoint(format!("unreadable checkpoint: {e}")))?;
        match envelope {
            CheckpointEnvelope::WorkflowState { version, state, .. } => {
                if version != CHECKPOINT_VERSION {
                    return Err(QuarryError::Checkpoint(format!(
                        "unsupported checkpoint version {version} (expected {CHECKPOINT_VERSION})"
                    )));
                }
                Ok(*state)
            }
        }
    }
}

/// Durable storage for workflow states.
#[allow(async_fn_in_trait)]
pub trait CheckpointStore: Send + Sync {
    /// Persist `state`, replacing any earlier checkpoint of the same run.
    async fn save(&self, state: &WorkflowState) -> Result<CheckpointHandle>;

    /// Load a run, active or archived.
    async fn load(&self, handle: &CheckpointHandle) -> Result<WorkflowState>;

    /// Move a terminal run out of the active set. It stays loadable.
    async fn archive(&self, handle: &CheckpointHandle) -> Result<()>;

    /// Handles of runs not yet archived.
    async fn list_active(&self) -> Result<Vec<CheckpointHandle>>;
}
