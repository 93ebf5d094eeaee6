//! In-memory checkpoint store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::{QuarryError, Result};
use crate::workflow::WorkflowState;

use super::{CheckpointEnvelope, CheckpointHandle, CheckpointStore};

/// Keeps encoded envelopes in memory, so every save/load still goes
/// through serialization. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    active: DashMap<Uuid, Vec<u8>>,
    archived: DashMap<Uuid, Vec<u8>>,
    unavailable: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.inner.saves.load(Ordering::SeqCst)
    }

    pub fn is_archived(&self, handle: &CheckpointHandle) -> bool {
        self.inner.archived.contains_key(&handle.0)
    }

    fn check_available(&self) -> Result<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(QuarryError::Checkpoint("checkpoint store unavailable".to_string()));
        }
        Ok(())
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &WorkflowState) -> Result<CheckpointHandle> {
        self.check_available()?;
        let bytes = CheckpointEnvelope::encode(state)?;
        if self.inner.archived.contains_key(&state.run_id) {
            self.inner.archived.insert(state.run_id, bytes);
        } else {
            self.inner.active.insert(state.run_id, bytes);
        }
        self.inner.saves.fetch_add(1, Ordering::SeqCst);
        Ok(CheckpointHandle(state.run_id))
    }

    async fn load(&self, handle: &CheckpointHandle) -> Result<WorkflowState> {
        self.check_available()?;
        let bytes = self
            .inner
            .active
            .get(&handle.0)
            .or_else(|| self.inner.archived.get(&handle.0))
            .map(|b| b.value().clone())
            .ok_or_else(|| QuarryError::Checkpoint(format!("no checkpoint for run {handle}")))?;
        CheckpointEnvelope::decode(&bytes)
    }

    async fn archive(&self, handle: &CheckpointHandle) -> Result<()> {
        self.check_available()?;
        if let Some((id, bytes)) = self.inner.active.remove(&handle.0) {
            self.inner.archived.insert(id, bytes);
            return Ok(());
        }
        if self.inner.archived.contains_key(&handle.0) {
            return Ok(());
        }
        Err(QuarryError::Checkpoint(format!("no checkpoint for run {handle}")))
    }

    async fn list_active(&self) -> Result<Vec<CheckpointHandle>> {
        self.check_available()?;
        let mut handles: Vec<_> = self.inner.active.iter().map(|e| CheckpointHandle(*e.key())).collect();
        handles.sort();
        Ok(handles)
    }
}
