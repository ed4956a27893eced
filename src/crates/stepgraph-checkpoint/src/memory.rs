//! In-memory checkpoint store

use crate::{
    checkpoint::{Checkpoint, CheckpointId, PendingWrite},
    error::{CheckpointError, Result},
    traits::CheckpointSaver,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CheckpointEntry {
    checkpoint: Checkpoint,
    writes: Vec<PendingWrite>,
}

type CheckpointStorage = Arc<RwLock<HashMap<String, Vec<CheckpointEntry>>>>;

/// Checkpoint store keeping every run's history in process memory
///
/// Cloning shares the underlying storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointSaver {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointSaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs with at least one checkpoint
    pub async fn run_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of stored checkpoints across all runs
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<CheckpointId> {
        let mut storage = self.storage.write().await;
        let entries = storage.entry(checkpoint.run_id.clone()).or_default();

        if entries.iter().any(|e| e.checkpoint.id == checkpoint.id) {
            return Err(CheckpointError::Storage(format!(
                "checkpoint {} already exists for run {}",
                checkpoint.id, checkpoint.run_id
            )));
        }

        let mut stored = checkpoint.clone();
        stored.pending_writes.clear();
        entries.push(CheckpointEntry {
            checkpoint: stored,
            writes: Vec::new(),
        });

        tracing::trace!(run_id = %checkpoint.run_id, checkpoint_id = %checkpoint.id, step = checkpoint.step, "Stored checkpoint");
        Ok(checkpoint.id.clone())
    }

    async fn get(&self, run_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        let entry = storage
            .get(run_id)
            .and_then(|entries| entries.iter().find(|e| e.checkpoint.id == checkpoint_id));

        Ok(entry.map(|entry| {
            let mut checkpoint = entry.checkpoint.clone();
            checkpoint.pending_writes = entry.writes.clone();
            checkpoint
        }))
    }

    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointId>> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(run_id)
            .map(|entries| entries.iter().map(|e| e.checkpoint.id.clone()).collect())
            .unwrap_or_default())
    }

    async fn put_writes(
        &self,
        run_id: &str,
        checkpoint_id: &str,
        task_id: &str,
        writes: Vec<(String, Value)>,
    ) -> Result<()> {
        let mut storage = self.storage.write().await;
        let entry = storage
            .get_mut(run_id)
            .and_then(|entries| entries.iter_mut().find(|e| e.checkpoint.id == checkpoint_id))
            .ok_or_else(|| CheckpointError::NotFound(format!("{run_id}/{checkpoint_id}")))?;

        entry.writes.retain(|w| w.task_id != task_id);
        entry.writes.extend(
            writes
                .into_iter()
                .map(|(channel, value)| PendingWrite::new(task_id, channel, value)),
        );
        Ok(())
    }

    async fn get_writes(&self, run_id: &str, checkpoint_id: &str) -> Result<Vec<PendingWrite>> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(run_id)
            .and_then(|entries| entries.iter().find(|e| e.checkpoint.id == checkpoint_id))
            .map(|entry| entry.writes.clone())
            .unwrap_or_default())
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        self.storage.write().await.remove(run_id);
        Ok(())
    }
}
