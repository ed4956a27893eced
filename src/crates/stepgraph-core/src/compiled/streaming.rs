//! Streaming execution
//!
//! A streamed run executes on its own tokio task and reports one
//! [`SuperstepResult`] per superstep through a bounded channel, so a slow
//! consumer applies backpressure to the run.

use super::CompiledGraph;
use crate::cancel::CancellationHandle;
use crate::config::RunConfig;
use crate::error::{GraphError, Result};
use crate::pregel::SuperstepLoop;
use crate::stream::{RunOutcome, SuperstepResult};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

/// Buffered results before the run waits for the consumer
const RESULT_BUFFER: usize = 100;

impl CompiledGraph {
    /// Start a run in the background with the graph's configuration
    pub async fn stream(&self, run_id: impl Into<String>, input: BTreeMap<String, Value>) -> Result<RunHandle> {
        self.stream_with_config(run_id, input, self.config.clone()).await
    }

    pub async fn stream_with_config(
        &self,
        run_id: impl Into<String>,
        input: BTreeMap<String, Value>,
        config: RunConfig,
    ) -> Result<RunHandle> {
        let cancel = CancellationHandle::new();
        let run = self.start(run_id, input, config, cancel.clone()).await?;
        Ok(RunHandle::spawn(run, cancel))
    }

    /// Resume a run in the background
    pub async fn stream_resume(
        &self,
        run_id: &str,
        checkpoint_id: Option<&str>,
        config: RunConfig,
    ) -> Result<RunHandle> {
        let cancel = CancellationHandle::new();
        let run = self.resume(run_id, checkpoint_id, config, cancel.clone()).await?;
        Ok(RunHandle::spawn(run, cancel))
    }
}

/// Handle to a run executing in the background
///
/// Yields one item per superstep. The stream ends after a terminal status or
/// after an `Err` item. Dropping the handle stops the run at the next
/// superstep boundary.
pub struct RunHandle {
    run_id: String,
    cancel: CancellationHandle,
    results: ReceiverStream<Result<SuperstepResult>>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RunHandle {
    fn spawn(run: SuperstepLoop, cancel: CancellationHandle) -> Self {
        let run_id = run.run_id().to_string();
        let (tx, rx) = mpsc::channel(RESULT_BUFFER);
        let span = tracing::info_span!("run", run_id = %run_id);
        let task = tokio::spawn(run.run(tx).instrument(span));
        Self {
            run_id,
            cancel,
            results: ReceiverStream::new(rx),
            task,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Request cancellation of the run
    ///
    /// The current superstep is abandoned and nothing from it is persisted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> CancellationHandle {
        self.cancel.clone()
    }

    /// Readable channel values after every superstep
    pub fn values(self) -> impl Stream<Item = Result<BTreeMap<String, Value>>> + Send {
        let mut handle = self;
        async_stream::stream! {
            while let Some(item) = handle.next().await {
                yield item.map(|result| result.values);
            }
        }
    }

    /// Consume the stream and return the final state of the run
    pub async fn outcome(mut self) -> Result<RunOutcome> {
        let mut last = None;
        while let Some(item) = self.next().await {
            last = Some(item?);
        }
        last.map(RunOutcome::from)
            .ok_or_else(|| GraphError::Cancelled(format!("run '{}' ended without a result", self.run_id)))
    }

    /// Wait for the background task to exit
    pub async fn join(self) -> Result<()> {
        let Self { results, task, .. } = self;
        drop(results);
        task.await
            .map_err(|e| GraphError::node_execution("<run>", e.to_string()))
    }
}

impl Stream for RunHandle {
    type Item = Result<SuperstepResult>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.results).poll_next(cx)
    }
}
