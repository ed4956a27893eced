//! Compiled graph: the runnable form of a [`GraphBuilder`](crate::GraphBuilder)
//!
//! A [`CompiledGraph`] is immutable and cheap to clone. Any number of runs may
//! execute against it concurrently; each run owns its own channels and is
//! identified by a run id in the checkpoint store.
//!
//! # Driving a run
//!
//! | method                                     | returns after            |
//! |--------------------------------------------|--------------------------|
//! | [`invoke`](CompiledGraph::invoke)          | the run stops            |
//! | [`stream`](CompiledGraph::stream)          | the input is persisted   |
//! | [`start`](CompiledGraph::start)            | the input is persisted; caller ticks |
//! | [`resume_to_end`](CompiledGraph::resume_to_end) | the resumed run stops |

mod streaming;

pub use streaming::RunHandle;

use crate::cancel::CancellationHandle;
use crate::config::RunConfig;
use crate::error::Result;
use crate::pregel::{PregelGraph, SuperstepLoop};
use crate::stream::RunOutcome;
use futures::TryStreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use stepgraph_checkpoint::{Checkpoint, CheckpointSaver, InMemoryCheckpointSaver};

/// Fresh random run id
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Executable graph bound to a checkpoint store
#[derive(Clone)]
pub struct CompiledGraph {
    graph: Arc<PregelGraph>,
    saver: Arc<dyn CheckpointSaver>,
    config: RunConfig,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.graph.nodes.keys().collect::<Vec<_>>())
            .field("channels", &self.graph.channels.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CompiledGraph {
    /// Graph backed by an in-memory store and the default run configuration
    pub(crate) fn new(graph: Arc<PregelGraph>) -> Self {
        Self {
            graph,
            saver: Arc::new(InMemoryCheckpointSaver::new()),
            config: RunConfig::default(),
        }
    }

    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.saver = saver;
        self
    }

    /// Configuration used by methods that do not take one
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn checkpointer(&self) -> &Arc<dyn CheckpointSaver> {
        &self.saver
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn pregel(&self) -> &Arc<PregelGraph> {
        &self.graph
    }

    pub fn node_names(&self) -> Vec<String> {
        self.graph.nodes.keys().cloned().collect()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.graph.channels.keys().cloned().collect()
    }

    pub fn entry_points(&self) -> Vec<String> {
        self.graph.entry_nodes.iter().cloned().collect()
    }

    /// Nodes scheduled when `channel` changes
    pub fn triggered_by(&self, channel: &str) -> Vec<String> {
        self.graph
            .index
            .nodes_for(channel)
            .map(|nodes| nodes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Persist the input checkpoint of a new run and hand back its loop
    pub async fn start(
        &self,
        run_id: impl Into<String>,
        input: BTreeMap<String, Value>,
        config: RunConfig,
        cancel: CancellationHandle,
    ) -> Result<SuperstepLoop> {
        SuperstepLoop::start(
            Arc::clone(&self.graph),
            Arc::clone(&self.saver),
            run_id,
            input,
            config,
            cancel,
        )
        .await
    }

    /// Load a run from one of its checkpoints and hand back its loop
    pub async fn resume(
        &self,
        run_id: &str,
        checkpoint_id: Option<&str>,
        config: RunConfig,
        cancel: CancellationHandle,
    ) -> Result<SuperstepLoop> {
        SuperstepLoop::resume(
            Arc::clone(&self.graph),
            Arc::clone(&self.saver),
            run_id,
            checkpoint_id,
            config,
            cancel,
        )
        .await
    }

    /// Resume from the run's most recent checkpoint
    pub async fn resume_latest(&self, run_id: &str) -> Result<SuperstepLoop> {
        self.resume(run_id, None, self.config.clone(), CancellationHandle::new())
            .await
    }

    /// Run to a stopping point with the graph's configuration
    pub async fn invoke(&self, run_id: impl Into<String>, input: BTreeMap<String, Value>) -> Result<RunOutcome> {
        self.invoke_with_config(run_id, input, self.config.clone()).await
    }

    pub async fn invoke_with_config(
        &self,
        run_id: impl Into<String>,
        input: BTreeMap<String, Value>,
        config: RunConfig,
    ) -> Result<RunOutcome> {
        let mut run = self.start(run_id, input, config, CancellationHandle::new()).await?;
        Ok(run.run_to_end().await?.into())
    }

    /// Resume a run and drive it to its next stopping point
    pub async fn resume_to_end(&self, run_id: &str, checkpoint_id: Option<&str>) -> Result<RunOutcome> {
        let mut run = self
            .resume(run_id, checkpoint_id, self.config.clone(), CancellationHandle::new())
            .await?;
        Ok(run.run_to_end().await?.into())
    }

    /// Latest persisted checkpoint of a run
    pub async fn get_state(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.saver.latest(run_id).await?)
    }

    /// Checkpoints of a run, newest first
    pub async fn history(&self, run_id: &str, limit: Option<usize>) -> Result<Vec<Checkpoint>> {
        let stream = self.saver.history(run_id, limit).await?;
        let checkpoints: Vec<Checkpoint> = stream.try_collect().await?;
        Ok(checkpoints)
    }
}
