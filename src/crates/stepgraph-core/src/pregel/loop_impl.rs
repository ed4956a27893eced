//! Main superstep execution loop.
//!
//! One [`SuperstepLoop`] drives one run. Every call to
//! [`tick`](SuperstepLoop::tick) performs a full superstep:
//!
//! ```text
//!  plan tasks ──► empty? ──────────────────────────────────► Done
//!      │
//!      ├─► step >= recursion_limit ─────────────────────────► RecursionLimitExceeded
//!      ├─► interrupt before a planned node ─────────────────► InterruptedBefore
//!      │
//!  replay logged outputs (first tick after resume)
//!      │
//!  execute remaining tasks ──✗──► log completed outputs ───► error
//!      │
//!  validate outputs ──► apply writes to a scratch copy ──► build checkpoint
//!      │
//!  saver.put ──✗──► error, state untouched
//!      │
//!  swap scratch copy in ──► halted? Done : interrupt after? InterruptedAfter : Running
//! ```
//!
//! Channel state only changes once the checkpoint describing it has been
//! persisted, so an observer never sees state that a resume could not
//! reproduce.

use crate::cancel::CancellationHandle;
use crate::config::RunConfig;
use crate::error::{GraphError, Result};
use crate::interrupt::InterruptWhen;
use crate::node::{reserved, NodeOutput};
use crate::pregel::algo::{apply_writes, plan_next_tasks, validate_outputs};
use crate::pregel::executor::TaskExecutor;
use crate::pregel::state::{ChannelSet, GraphState};
use crate::pregel::types::{PregelGraph, Task, TaskOutput};
use crate::stream::{RunStatus, SuperstepResult, TaskSummary};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use stepgraph_checkpoint::{
    Checkpoint, CheckpointError, CheckpointMetadata, CheckpointSaver, CheckpointSource, PendingSend, PendingWrite,
};
use tokio::sync::mpsc;
use tracing::Instrument;

/// Drives a single run superstep by superstep
pub struct SuperstepLoop {
    graph: Arc<PregelGraph>,
    saver: Arc<dyn CheckpointSaver>,
    config: RunConfig,
    executor: TaskExecutor,
    cancel: CancellationHandle,
    state: GraphState,
    /// Set until the first tick after a resume has run
    resuming: bool,
}

impl std::fmt::Debug for SuperstepLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuperstepLoop")
            .field("run_id", &self.state.run_id())
            .field("step", &self.state.step())
            .field("status", &self.state.status)
            .field("resuming", &self.resuming)
            .finish_non_exhaustive()
    }
}

impl SuperstepLoop {
    /// Start a new run: write `input` into fresh channels and persist the
    /// input checkpoint
    ///
    /// Fails with [`GraphError::RunExists`] when `run_id` already has
    /// checkpoints; continue such a run with [`resume`](Self::resume).
    pub async fn start(
        graph: Arc<PregelGraph>,
        saver: Arc<dyn CheckpointSaver>,
        run_id: impl Into<String>,
        input: BTreeMap<String, Value>,
        config: RunConfig,
        cancel: CancellationHandle,
    ) -> Result<Self> {
        config.validate()?;
        let run_id = run_id.into();
        if !saver.list(&run_id).await?.is_empty() {
            return Err(GraphError::RunExists(run_id));
        }

        let mut channels = ChannelSet::fresh(&graph.channels);
        let updated = channels.apply_input(input)?;
        let mut checkpoint = Checkpoint::input(run_id.clone(), channels.snapshot());
        checkpoint.updated_channels = updated;
        saver.put(&checkpoint).await?;

        tracing::info!(
            run_id = %run_id,
            checkpoint_id = %checkpoint.id,
            "Run started"
        );

        let executor = TaskExecutor::new(&config);
        Ok(Self {
            graph,
            saver,
            config,
            executor,
            cancel,
            state: GraphState::new(channels, checkpoint),
            resuming: false,
        })
    }

    /// Continue a run from one of its checkpoints, or its latest when
    /// `checkpoint_id` is `None`
    ///
    /// # Errors
    ///
    /// - [`GraphError::Checkpoint`] wrapping `NotFound` when the run or
    ///   checkpoint does not exist
    /// - [`GraphError::CheckpointCorruption`] when the checkpoint cannot be
    ///   restored into this graph's channels
    pub async fn resume(
        graph: Arc<PregelGraph>,
        saver: Arc<dyn CheckpointSaver>,
        run_id: &str,
        checkpoint_id: Option<&str>,
        config: RunConfig,
        cancel: CancellationHandle,
    ) -> Result<Self> {
        config.validate()?;

        let loaded = match checkpoint_id {
            Some(id) => saver.get(run_id, id).await?,
            None => saver.latest(run_id).await?,
        };
        let checkpoint = loaded.ok_or_else(|| {
            GraphError::from(CheckpointError::NotFound(format!(
                "run '{run_id}' checkpoint '{}'",
                checkpoint_id.unwrap_or("latest")
            )))
        })?;

        checkpoint.validate()?;
        let channels = ChannelSet::restore(&graph.channels, &checkpoint)?;

        tracing::info!(
            run_id = %run_id,
            checkpoint_id = %checkpoint.id,
            step = checkpoint.step,
            pending_writes = checkpoint.pending_writes.len(),
            "Run resumed"
        );

        let executor = TaskExecutor::new(&config);
        Ok(Self {
            graph,
            saver,
            config,
            executor,
            cancel,
            state: GraphState::new(channels, checkpoint),
            resuming: true,
        })
    }

    pub fn run_id(&self) -> &str {
        self.state.run_id()
    }

    pub fn state(&self) -> &GraphState {
        &self.state
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.state.checkpoint
    }

    pub fn status(&self) -> &RunStatus {
        &self.state.status
    }

    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancel
    }

    /// Execute one superstep
    ///
    /// On error the run is marked failed and its persisted state is the last
    /// checkpoint saved before the failing superstep.
    pub async fn tick(&mut self) -> Result<SuperstepResult> {
        let span = tracing::info_span!(
            "superstep",
            run_id = %self.state.run_id(),
            step = self.state.step()
        );
        let result = self.tick_inner().instrument(span).await;
        match &result {
            Ok(step) => self.state.status = step.status.clone(),
            Err(error) => {
                self.state.status = RunStatus::Failed {
                    reason: error.to_string(),
                }
            }
        }
        self.resuming = false;
        result
    }

    async fn tick_inner(&mut self) -> Result<SuperstepResult> {
        if self.cancel.is_cancelled() {
            return Err(GraphError::Cancelled("cancelled before superstep".to_string()));
        }
        self.state.status = RunStatus::Running;

        let previous = self.state.checkpoint.clone();
        let tasks = plan_next_tasks(
            &previous,
            &self.graph,
            &self.state.channels,
            &previous.updated_channels,
            &previous.pending_sends,
        )?;

        if tasks.is_empty() {
            tracing::info!(step = previous.step, halted = previous.halted, "Run finished");
            return Ok(self.result(RunStatus::Done, Vec::new(), BTreeSet::new()));
        }

        let limit = self.config.recursion_limit();
        if previous.step >= limit {
            tracing::error!(limit, "Recursion limit reached");
            return Err(GraphError::RecursionLimitExceeded { limit });
        }

        let interrupt_before = self.interrupt_before_hits(&previous, &tasks);
        if !interrupt_before.is_empty() {
            let marker = vec![(reserved::INTERRUPT.to_string(), json!({ "before": interrupt_before }))];
            self.saver
                .put_writes(&previous.run_id, &previous.id, reserved::INTERRUPT, marker)
                .await?;
            tracing::info!(nodes = ?interrupt_before, "Interrupted before nodes");
            let planned = tasks.iter().map(TaskSummary::from).collect();
            return Ok(self.result(
                RunStatus::InterruptedBefore {
                    nodes: interrupt_before,
                },
                planned,
                BTreeSet::new(),
            ));
        }

        let (mut outputs, to_run) = if self.resuming {
            replay_logged_outputs(&previous.pending_writes, tasks)
        } else {
            (Vec::new(), tasks)
        };
        if !outputs.is_empty() {
            tracing::info!(replayed = outputs.len(), "Reusing logged task outputs");
        }

        tracing::debug!(tasks = to_run.len(), "Executing superstep");
        match self.executor.execute_all(to_run, &self.cancel).await {
            Ok(executed) => outputs.extend(executed),
            Err(failure) => {
                if !matches!(failure.error, GraphError::Cancelled(_)) {
                    self.log_completed(&previous, &failure.completed).await;
                }
                return Err(failure.error);
            }
        }
        outputs.sort_by(|a, b| a.path.cmp(&b.path));

        validate_outputs(&self.graph, &outputs)?;

        let mut channels = self.state.channels.clone();
        let updated = apply_writes(&mut channels, &outputs)?;
        let next = self.next_checkpoint(&previous, &channels, updated.clone(), &outputs);
        self.saver.put(&next).await?;

        tracing::debug!(
            checkpoint_id = %next.id,
            updated = ?updated,
            sends = next.pending_sends.len(),
            "Superstep committed"
        );

        let halted = next.halted;
        self.state.channels = channels;
        self.state.checkpoint = next;

        let executed: BTreeSet<&str> = outputs.iter().map(TaskOutput::node).collect();
        let status = if halted {
            tracing::info!("Run halted by node");
            RunStatus::Done
        } else {
            let after: Vec<String> = executed
                .iter()
                .filter(|node| {
                    self.config.interrupt_after.contains(**node) || previous.interrupts.after.contains(**node)
                })
                .map(|node| node.to_string())
                .collect();
            if after.is_empty() {
                RunStatus::Running
            } else {
                tracing::info!(nodes = ?after, "Interrupted after nodes");
                RunStatus::InterruptedAfter { nodes: after }
            }
        };

        let summaries = outputs.iter().map(TaskSummary::from).collect();
        Ok(self.result(status, summaries, updated))
    }

    /// Tick until the run reaches a terminal status
    pub async fn run_to_end(&mut self) -> Result<SuperstepResult> {
        loop {
            let result = self.tick().await?;
            if result.status.is_terminal() {
                return Ok(result);
            }
        }
    }

    /// Tick until a terminal status, sending every result to `tx`
    ///
    /// Stops early when the receiver is dropped. A failure is sent as the
    /// final item.
    pub async fn run(mut self, tx: mpsc::Sender<Result<SuperstepResult>>) {
        loop {
            match self.tick().await {
                Ok(result) => {
                    let terminal = result.status.is_terminal();
                    if tx.send(Ok(result)).await.is_err() {
                        tracing::debug!(run_id = %self.run_id(), "Result receiver dropped, stopping run");
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
                Err(error) => {
                    tracing::error!(run_id = %self.run_id(), error = %error, "Run failed");
                    let _ = tx.send(Err(error)).await;
                    return;
                }
            }
        }
    }

    /// Planned nodes to pause before, unless this resume already paused there
    fn interrupt_before_hits(&self, checkpoint: &Checkpoint, tasks: &[Task]) -> Vec<String> {
        if self.resuming
            && checkpoint
                .pending_writes
                .iter()
                .any(|write| write.task_id == reserved::INTERRUPT)
        {
            return Vec::new();
        }

        let planned: BTreeSet<&str> = tasks.iter().map(Task::node).collect();
        planned
            .into_iter()
            .filter(|node| self.config.interrupt_before.contains(*node) || checkpoint.interrupts.before.contains(*node))
            .map(str::to_string)
            .collect()
    }

    fn next_checkpoint(
        &self,
        previous: &Checkpoint,
        channels: &ChannelSet,
        updated: BTreeSet<String>,
        outputs: &[TaskOutput],
    ) -> Checkpoint {
        let mut next = previous.next(channels.snapshot(), updated);

        let mut nodes: Vec<String> = Vec::new();
        for output in outputs {
            let node = output.node();
            // Registrations fire once
            next.interrupts.before.remove(node);
            next.interrupts.after.remove(node);
            if !nodes.iter().any(|n| n == node) {
                nodes.push(node.to_string());
            }
        }

        for output in outputs {
            next.pending_sends
                .extend(output.output.pushes.iter().cloned().map(PendingSend::from));
            next.halted |= output.output.halt;
            for when in &output.output.interrupts {
                let registrations = match when {
                    InterruptWhen::Before => &mut next.interrupts.before,
                    InterruptWhen::After => &mut next.interrupts.after,
                };
                registrations.insert(output.node().to_string());
            }
        }

        let source = if self.resuming {
            CheckpointSource::Resume
        } else {
            CheckpointSource::Loop
        };
        next.metadata = CheckpointMetadata::new().with_source(source).with_nodes(nodes);
        next
    }

    /// Record outputs of tasks that finished in a failed superstep
    async fn log_completed(&self, checkpoint: &Checkpoint, completed: &[TaskOutput]) {
        for output in completed.iter().filter(|o| !o.replayed) {
            if let Err(error) = self
                .saver
                .put_writes(
                    &checkpoint.run_id,
                    &checkpoint.id,
                    &output.task_id,
                    output.output.to_pending_writes(),
                )
                .await
            {
                tracing::warn!(task_id = %output.task_id, error = %error, "Failed to log pending writes");
            }
        }
    }

    fn result(&self, status: RunStatus, tasks: Vec<TaskSummary>, updated_channels: BTreeSet<String>) -> SuperstepResult {
        SuperstepResult {
            run_id: self.state.run_id().to_string(),
            step: self.state.step(),
            status,
            checkpoint_id: self.state.checkpoint.id.clone(),
            tasks,
            updated_channels,
            values: self.state.channels.values(),
            finished_at: Utc::now(),
        }
    }
}

/// Split planned tasks into those with a complete logged output and the rest
fn replay_logged_outputs(pending: &[PendingWrite], tasks: Vec<Task>) -> (Vec<TaskOutput>, Vec<Task>) {
    let mut by_task: BTreeMap<&str, Vec<(&str, &Value)>> = BTreeMap::new();
    for write in pending {
        by_task
            .entry(write.task_id.as_str())
            .or_default()
            .push((write.channel.as_str(), &write.value));
    }

    let mut replayed = Vec::new();
    let mut to_run = Vec::new();
    for task in tasks {
        let logged = by_task
            .get(task.id.as_str())
            .and_then(|writes| NodeOutput::from_pending_writes(writes.iter().copied()));
        match logged {
            Some(output) => replayed.push(TaskOutput {
                task_id: task.id.clone(),
                path: task.path.clone(),
                reads: task.reads.clone(),
                output,
                attempts: 0,
                replayed: true,
            }),
            None => to_run.push(task),
        }
    }
    (replayed, to_run)
}
