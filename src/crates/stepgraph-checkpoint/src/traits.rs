//! Checkpoint store trait
//!
//! The engine needs very little from a store: save a snapshot, load one back,
//! enumerate a run's snapshots in the order they were saved, and find the most
//! recent one. Pending writes of a failed superstep are logged against the
//! checkpoint the superstep started from.

use crate::{
    checkpoint::{Checkpoint, CheckpointId, PendingWrite},
    error::{CheckpointError, Result},
};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;

/// Stream of checkpoints, newest first
pub type CheckpointStream<'a> = Pin<Box<dyn Stream<Item = Result<Checkpoint>> + Send + 'a>>;

/// Persistence backend for checkpoints
///
/// Implementations must be safe to share between concurrently executing runs.
/// Snapshots are immutable once saved; `put` of an id that already exists is
/// an error.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Save a checkpoint, returning its id
    async fn put(&self, checkpoint: &Checkpoint) -> Result<CheckpointId>;

    /// Load a checkpoint with its logged pending writes attached
    ///
    /// Returns `Ok(None)` if the run has no checkpoint with that id.
    async fn get(&self, run_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>>;

    /// Ids of every checkpoint of a run, oldest first
    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointId>>;

    /// Most recently saved checkpoint of a run
    async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        match self.list(run_id).await?.last() {
            Some(id) => self.get(run_id, id).await,
            None => Ok(None),
        }
    }

    /// Log the writes one task produced against a checkpoint
    ///
    /// Logging the same task twice replaces its earlier record.
    async fn put_writes(
        &self,
        run_id: &str,
        checkpoint_id: &str,
        task_id: &str,
        writes: Vec<(String, Value)>,
    ) -> Result<()>;

    /// Pending writes logged against a checkpoint, in logging order
    async fn get_writes(&self, run_id: &str, checkpoint_id: &str) -> Result<Vec<PendingWrite>>;

    /// Checkpoints of a run, newest first
    ///
    /// Ids are listed up front; each checkpoint is loaded when the stream
    /// reaches it.
    async fn history<'a>(&'a self, run_id: &'a str, limit: Option<usize>) -> Result<CheckpointStream<'a>> {
        let mut ids = self.list(run_id).await?;
        ids.reverse();
        if let Some(limit) = limit {
            ids.truncate(limit);
        }

        let checkpoints = stream::iter(ids)
            .then(move |id| async move { self.get(run_id, &id).await })
            .filter_map(|loaded| async move { loaded.transpose() });
        Ok(Box::pin(checkpoints))
    }

    /// Remove every checkpoint and pending write of a run
    ///
    /// Stores that cannot delete report [`CheckpointError::Storage`].
    async fn delete_run(&self, run_id: &str) -> Result<()> {
        Err(CheckpointError::Storage(format!(
            "delete_run is not supported by this store (run '{run_id}')"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCheckpointSaver;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store that only implements the required methods and counts loads
    #[derive(Default)]
    struct CountingSaver {
        inner: InMemoryCheckpointSaver,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl CheckpointSaver for CountingSaver {
        async fn put(&self, checkpoint: &Checkpoint) -> Result<CheckpointId> {
            self.inner.put(checkpoint).await
        }

        async fn get(&self, run_id: &str, checkpoint_id: &str) -> Result<Option<Checkpoint>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(run_id, checkpoint_id).await
        }

        async fn list(&self, run_id: &str) -> Result<Vec<CheckpointId>> {
            self.inner.list(run_id).await
        }

        async fn put_writes(
            &self,
            run_id: &str,
            checkpoint_id: &str,
            task_id: &str,
            writes: Vec<(String, Value)>,
        ) -> Result<()> {
            self.inner.put_writes(run_id, checkpoint_id, task_id, writes).await
        }

        async fn get_writes(&self, run_id: &str, checkpoint_id: &str) -> Result<Vec<PendingWrite>> {
            self.inner.get_writes(run_id, checkpoint_id).await
        }
    }

    async fn saver_with_steps(count: usize) -> (CountingSaver, Vec<CheckpointId>) {
        let saver = CountingSaver::default();
        let mut checkpoint = Checkpoint::input("run-1", BTreeMap::from([("x".to_string(), json!(0))]));
        let mut ids = Vec::new();
        for step in 0..count {
            if step > 0 {
                checkpoint = checkpoint.next(checkpoint.channel_values.clone(), BTreeSet::new());
            }
            ids.push(saver.put(&checkpoint).await.unwrap());
        }
        (saver, ids)
    }

    #[tokio::test]
    async fn test_history_loads_checkpoints_on_demand() {
        let (saver, ids) = saver_with_steps(5).await;

        let mut history = saver.history("run-1", None).await.unwrap();
        assert_eq!(saver.gets.load(Ordering::SeqCst), 0);

        let newest = history.next().await.unwrap().unwrap();
        assert_eq!(newest.id, ids[4]);
        assert_eq!(saver.gets.load(Ordering::SeqCst), 1);

        let rest: Vec<_> = history.collect().await;
        assert_eq!(rest.len(), 4);
        assert_eq!(saver.gets.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_default_delete_run_reports_unsupported() {
        let (saver, _) = saver_with_steps(1).await;

        let err = saver.delete_run("run-1").await.unwrap_err();
        assert!(matches!(err, CheckpointError::Storage(_)));
        assert_eq!(saver.list("run-1").await.unwrap().len(), 1);
    }
}
