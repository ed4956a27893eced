//! Core types for Pregel execution

use crate::node::{NodeExecutor, NodeInput, NodeOutput};
use crate::pregel::index::DependencyIndex;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use stepgraph_checkpoint::Channel;

/// Why a task was scheduled
///
/// Ordering matters: PUSH tasks sort ahead of PULL tasks, so their writes are
/// applied first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Explicit message from another node
    Push,
    /// A trigger channel changed
    Pull,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Push => write!(f, "push"),
            TaskKind::Pull => write!(f, "pull"),
        }
    }
}

/// Deterministic position of a task within its superstep
///
/// PUSH tasks order by the index of their send, PULL tasks by node name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskPath {
    pub kind: TaskKind,
    pub index: usize,
    pub node: String,
}

impl TaskPath {
    pub fn push(index: usize, node: impl Into<String>) -> Self {
        Self {
            kind: TaskKind::Push,
            index,
            node: node.into(),
        }
    }

    pub fn pull(node: impl Into<String>) -> Self {
        Self {
            kind: TaskKind::Pull,
            index: 0,
            node: node.into(),
        }
    }

    /// Task id for this path when planned from `checkpoint_id`
    pub fn task_id(&self, checkpoint_id: &str) -> String {
        format!("{checkpoint_id}:{}:{}:{}", self.kind, self.node, self.index)
    }
}

/// A node together with its callable
#[derive(Clone)]
pub struct PregelNode {
    pub name: String,
    /// Channels whose values form the PULL input; all must be non-empty
    pub reads: Vec<String>,
    /// Channels the node may write
    pub writes: BTreeSet<String>,
    /// Channels whose change schedules the node
    pub triggers: Vec<String>,
    pub retry_policy: Option<RetryPolicy>,
    pub executor: Arc<dyn NodeExecutor>,
}

impl fmt::Debug for PregelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PregelNode")
            .field("name", &self.name)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .field("triggers", &self.triggers)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

/// Static, validated structure of a compiled graph
#[derive(Debug)]
pub struct PregelGraph {
    /// Channel prototypes; every run starts from fresh copies
    pub channels: BTreeMap<String, Box<dyn Channel>>,
    pub nodes: BTreeMap<String, PregelNode>,
    pub entry_nodes: BTreeSet<String>,
    pub index: DependencyIndex,
}

/// One scheduled node invocation
#[derive(Clone)]
pub struct Task {
    pub id: String,
    pub path: TaskPath,
    pub input: NodeInput,
    /// Channels consumed once the task has run
    pub reads: Vec<String>,
    pub retry_policy: Option<RetryPolicy>,
    pub executor: Arc<dyn NodeExecutor>,
}

impl Task {
    pub fn node(&self) -> &str {
        &self.path.node
    }

    pub fn kind(&self) -> TaskKind {
        self.path.kind
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

/// Buffered result of a finished task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    pub task_id: String,
    pub path: TaskPath,
    pub reads: Vec<String>,
    pub output: NodeOutput,
    pub attempts: usize,
    /// Output came from the pending-writes log instead of running the node
    pub replayed: bool,
}

impl TaskOutput {
    pub fn node(&self) -> &str {
        &self.path.node
    }
}
