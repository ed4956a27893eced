//! Task executor for Pregel supersteps.
//!
//! Runs every task of one superstep concurrently, bounded by a semaphore, and
//! retries failed tasks according to their retry policy.
//!
//! ```text
//!  tasks ──► JoinSet ──► [permit] ──► attempt 1 ──✗──► backoff ──► attempt 2 ... ──► TaskOutput
//!                                          │
//!                                          └── panic is caught and counted as a failed attempt
//!
//!  first exhausted task ──► abort_all ──► SuperstepFailure { error, completed }
//! ```
//!
//! Outputs are returned sorted by task path, independent of completion order.

use crate::cancel::CancellationHandle;
use crate::config::RunConfig;
use crate::error::{GraphError, Result};
use crate::pregel::types::{Task, TaskOutput};
use crate::retry::RetryPolicy;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;

/// A superstep that did not complete
#[derive(Debug)]
pub struct SuperstepFailure {
    pub error: GraphError,
    /// Tasks that finished before the superstep was abandoned, in path order
    pub completed: Vec<TaskOutput>,
}

/// Executor for the tasks of one superstep
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    concurrency: usize,
    default_retry: RetryPolicy,
    step_timeout: Option<Duration>,
    cancel_grace: Duration,
}

impl TaskExecutor {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            concurrency: config.effective_concurrency().max(1),
            default_retry: config.retry_policy(),
            step_timeout: config.step_timeout(),
            cancel_grace: config.cancel_grace(),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Execute all tasks, returning their outputs in path order
    ///
    /// Fails fast: the first task to exhaust its retries aborts the rest. A
    /// step timeout or cancellation abandons the superstep the same way;
    /// outputs of a cancelled superstep are discarded.
    pub async fn execute_all(
        &self,
        tasks: Vec<Task>,
        cancel: &CancellationHandle,
    ) -> std::result::Result<Vec<TaskOutput>, SuperstepFailure> {
        let total = tasks.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set: JoinSet<Result<TaskOutput>> = JoinSet::new();
        let mut spawned: HashMap<Id, (String, String)> = HashMap::with_capacity(total);

        for task in tasks {
            let semaphore = Arc::clone(&semaphore);
            let policy = task.retry_policy.clone().unwrap_or_else(|| self.default_retry.clone());
            let label = (task.node().to_string(), task.id.clone());
            let handle = join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| GraphError::Cancelled(format!("task '{}' was never started", task.id)))?;
                run_with_retry(task, policy).await
            });
            spawned.insert(handle.id(), label);
        }

        let deadline = self.step_timeout.map(|timeout| Instant::now() + timeout);
        let sleep = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));
        tokio::pin!(sleep);

        let mut completed = Vec::with_capacity(total);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    semaphore.close();
                    self.drain(&mut join_set).await;
                    return Err(SuperstepFailure {
                        error: GraphError::Cancelled("cancelled during superstep".to_string()),
                        completed: Vec::new(),
                    });
                }

                _ = &mut sleep, if deadline.is_some() => {
                    join_set.abort_all();
                    let duration_ms = self.step_timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
                    tracing::warn!(duration_ms, finished = completed.len(), total, "Superstep timed out");
                    completed.sort_by(|a: &TaskOutput, b: &TaskOutput| a.path.cmp(&b.path));
                    return Err(SuperstepFailure {
                        error: GraphError::Timeout {
                            operation: "superstep".to_string(),
                            duration_ms,
                        },
                        completed,
                    });
                }

                joined = join_set.join_next_with_id() => match joined {
                    None => break,
                    Some(Ok((_, Ok(output)))) => completed.push(output),
                    Some(Ok((_, Err(error)))) => {
                        join_set.abort_all();
                        completed.sort_by(|a, b| a.path.cmp(&b.path));
                        return Err(SuperstepFailure { error, completed });
                    }
                    Some(Err(join_error)) => {
                        join_set.abort_all();
                        completed.sort_by(|a, b| a.path.cmp(&b.path));
                        return Err(SuperstepFailure {
                            error: join_failure(&spawned, join_error),
                            completed,
                        });
                    }
                },
            }
        }

        completed.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(completed)
    }

    /// Give in-flight tasks the grace period, then abort whatever is left
    async fn drain(&self, join_set: &mut JoinSet<Result<TaskOutput>>) {
        let grace = tokio::time::sleep(self.cancel_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                _ = &mut grace => {
                    tracing::warn!(remaining = join_set.len(), "Grace period elapsed, aborting tasks");
                    break;
                }
                joined = join_set.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
            }
        }
        join_set.abort_all();
    }
}

/// Run one task until it succeeds or its retry policy gives up
async fn run_with_retry(task: Task, policy: RetryPolicy) -> Result<TaskOutput> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut input = task.input.clone();
        input.attempt = attempt;

        tracing::debug!(
            task_id = %task.id,
            node = %task.node(),
            attempt,
            max_attempts = policy.max_attempts,
            "Executing task"
        );

        let error = match AssertUnwindSafe(task.executor.execute(input)).catch_unwind().await {
            Ok(Ok(output)) => {
                if attempt > 1 {
                    tracing::info!(task_id = %task.id, attempts = attempt, "Task succeeded after retry");
                }
                return Ok(TaskOutput {
                    task_id: task.id.clone(),
                    path: task.path.clone(),
                    reads: task.reads.clone(),
                    output,
                    attempts: attempt,
                    replayed: false,
                });
            }
            Ok(Err(error)) => error,
            Err(panic) => GraphError::node_execution(task.node(), panic_message(panic.as_ref())),
        };

        if !error.is_retryable() || !policy.should_retry(attempt) {
            tracing::error!(
                task_id = %task.id,
                node = %task.node(),
                attempts = attempt,
                error = %error,
                "Task failed after all retry attempts"
            );
            return Err(GraphError::TaskExecution {
                node: task.node().to_string(),
                task_id: task.id.clone(),
                attempts: attempt,
                error: error.to_string(),
            });
        }

        let delay = policy.calculate_delay(attempt - 1);
        tracing::warn!(
            task_id = %task.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Task failed, retrying after delay"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Map a task that died outside its retry loop back to the node it ran
fn join_failure(spawned: &HashMap<Id, (String, String)>, join_error: JoinError) -> GraphError {
    match spawned.get(&join_error.id()) {
        Some((node, task_id)) => {
            tracing::error!(task_id = %task_id, node = %node, error = %join_error, "Task aborted outside retry loop");
            GraphError::NodeExecution {
                node: node.clone(),
                error: format!("task '{task_id}': {join_error}"),
            }
        }
        None => GraphError::NodeExecution {
            node: "<unknown>".to_string(),
            error: join_error.to_string(),
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{node_fn, NodeExecutor, NodeInput, NodeOutput};
    use crate::pregel::types::{TaskKind, TaskPath};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task(node: &str, executor: Arc<dyn NodeExecutor>, retry: Option<RetryPolicy>) -> Task {
        let path = TaskPath::pull(node);
        let id = path.task_id("cp");
        Task {
            input: NodeInput {
                task_id: id.clone(),
                node: node.to_string(),
                kind: TaskKind::Pull,
                step: 1,
                attempt: 1,
                values: BTreeMap::new(),
                payload: None,
            },
            id,
            path,
            reads: Vec::new(),
            retry_policy: retry,
            executor,
        }
    }

    fn fast_retry(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .with_initial_interval(0.001)
            .with_jitter(false)
    }

    fn config() -> RunConfig {
        RunConfig::new().with_retry_policy(fast_retry(1))
    }

    /// Fails the first `failures` attempts, then writes its attempt number
    fn flaky(failures: usize, calls: Arc<AtomicUsize>) -> Arc<dyn NodeExecutor> {
        Arc::new(node_fn(move |input: NodeInput| {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(GraphError::node_execution(&input.node, "transient"))
                } else {
                    Ok(NodeOutput::new().write("out", json!(input.attempt)))
                }
            }
        }))
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = TaskExecutor::new(&config());
        let tasks = vec![task("b", flaky(1, Arc::clone(&calls)), Some(fast_retry(2)))];

        let outputs = executor.execute_all(tasks, &CancellationHandle::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outputs[0].attempts, 2);
        assert_eq!(outputs[0].output.writes, vec![("out".to_string(), json!(2))]);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = TaskExecutor::new(&config());
        let tasks = vec![task("b", flaky(10, Arc::clone(&calls)), Some(fast_retry(3)))];

        let failure = executor.execute_all(tasks, &CancellationHandle::new()).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match failure.error {
            GraphError::TaskExecution { node, attempts, .. } => {
                assert_eq!(node, "b");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_counts_as_failed_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let panicking: Arc<dyn NodeExecutor> = Arc::new(node_fn(move |_input: NodeInput| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if counter.load(Ordering::SeqCst) > 0 {
                    panic!("boom");
                }
                Ok(NodeOutput::new())
            }
        }));

        let executor = TaskExecutor::new(&config());
        let failure = executor
            .execute_all(vec![task("p", panicking, Some(fast_retry(2)))], &CancellationHandle::new())
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            failure.error,
            GraphError::TaskExecution { ref error, .. } if error.contains("boom")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_retry_interval_still_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::new(2)
            .with_initial_interval(1e20)
            .with_max_interval(1e20)
            .with_jitter(false);
        let executor = TaskExecutor::new(&config());

        let outputs = executor
            .execute_all(vec![task("flaky", flaky(1, Arc::clone(&calls)), Some(policy))], &CancellationHandle::new())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outputs[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_join_failure_names_the_node() {
        let mut join_set: JoinSet<()> = JoinSet::new();
        let handle = join_set.spawn(async { panic!("outside the guard") });
        let spawned = HashMap::from([(handle.id(), ("flaky".to_string(), "cp:pull:flaky:0".to_string()))]);

        let join_error = join_set.join_next().await.unwrap().unwrap_err();
        match join_failure(&spawned, join_error) {
            GraphError::NodeExecution { node, error } => {
                assert_eq!(node, "flaky");
                assert!(error.contains("cp:pull:flaky:0"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..8)
            .map(|i| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                let executor: Arc<dyn NodeExecutor> = Arc::new(node_fn(move |_input: NodeInput| {
                    let active = Arc::clone(&active);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(NodeOutput::new())
                    }
                }));
                task(&format!("n{i}"), executor, None)
            })
            .collect();

        let executor = TaskExecutor::new(&config().with_concurrency_limit(2));
        let outputs = executor.execute_all(tasks, &CancellationHandle::new()).await.unwrap();

        assert_eq!(outputs.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        let nodes: Vec<_> = outputs.iter().map(|o| o.node().to_string()).collect();
        let mut sorted = nodes.clone();
        sorted.sort();
        assert_eq!(nodes, sorted);
    }

    #[tokio::test]
    async fn test_step_timeout_keeps_completed_outputs() {
        let quick: Arc<dyn NodeExecutor> =
            Arc::new(node_fn(|_input: NodeInput| async { Ok(NodeOutput::new().write("a", json!(1))) }));
        let slow: Arc<dyn NodeExecutor> = Arc::new(node_fn(|_input: NodeInput| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(NodeOutput::new())
        }));

        let executor = TaskExecutor::new(&config().with_step_timeout(Duration::from_millis(100)));
        let failure = executor
            .execute_all(vec![task("quick", quick, None), task("slow", slow, None)], &CancellationHandle::new())
            .await
            .unwrap_err();

        assert!(matches!(failure.error, GraphError::Timeout { duration_ms: 100, .. }));
        assert_eq!(failure.completed.len(), 1);
        assert_eq!(failure.completed[0].node(), "quick");
    }

    #[tokio::test]
    async fn test_cancellation_discards_outputs() {
        let slow: Arc<dyn NodeExecutor> = Arc::new(node_fn(|_input: NodeInput| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(NodeOutput::new())
        }));
        let cancel = CancellationHandle::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            });
        }

        let executor = TaskExecutor::new(&config().with_cancel_grace(Duration::from_millis(20)));
        let started = std::time::Instant::now();
        let failure = executor.execute_all(vec![task("slow", slow, None)], &cancel).await.unwrap_err();

        assert!(matches!(failure.error, GraphError::Cancelled(_)));
        assert!(failure.completed.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_empty_superstep() {
        let executor = TaskExecutor::new(&config());
        let outputs = executor.execute_all(Vec::new(), &CancellationHandle::new()).await.unwrap();
        assert!(outputs.is_empty());
    }
}
