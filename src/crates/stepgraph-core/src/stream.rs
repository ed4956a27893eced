//! Results streamed while a run executes
//!
//! Every tick of the superstep loop yields one [`SuperstepResult`]. The last
//! item of a run carries a terminal [`RunStatus`]; a failed run ends its
//! stream with an `Err` instead.

use crate::pregel::types::{Task, TaskKind, TaskOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Lifecycle of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    /// No more tasks, or a node asked the run to stop
    Done,
    /// Paused before executing the listed nodes
    InterruptedBefore { nodes: Vec<String> },
    /// Paused after executing the listed nodes
    InterruptedAfter { nodes: Vec<String> },
    Failed { reason: String },
}

impl RunStatus {
    /// Whether the loop stops on this status
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunStatus::InterruptedBefore { .. } | RunStatus::InterruptedAfter { .. })
    }
}

/// A task as reported in a superstep result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    pub node: String,
    pub kind: TaskKind,
    /// Attempts made; 0 for tasks that were planned but not executed
    pub attempts: usize,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            node: task.node().to_string(),
            kind: task.kind(),
            attempts: 0,
            replayed: false,
        }
    }
}

impl From<&TaskOutput> for TaskSummary {
    fn from(output: &TaskOutput) -> Self {
        Self {
            id: output.task_id.clone(),
            node: output.node().to_string(),
            kind: output.path.kind,
            attempts: output.attempts,
            replayed: output.replayed,
        }
    }
}

/// Outcome of one tick of the superstep loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperstepResult {
    pub run_id: String,
    /// Supersteps completed after this tick
    pub step: u64,
    pub status: RunStatus,
    /// Latest persisted checkpoint after this tick
    pub checkpoint_id: String,
    /// Executed tasks, or the planned tasks when interrupted before them
    pub tasks: Vec<TaskSummary>,
    pub updated_channels: BTreeSet<String>,
    /// Readable channel values after this tick
    pub values: BTreeMap<String, Value>,
    pub finished_at: DateTime<Utc>,
}

/// Final state of a run driven to a stopping point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub step: u64,
    pub checkpoint_id: String,
    pub values: BTreeMap<String, Value>,
}

impl From<SuperstepResult> for RunOutcome {
    fn from(result: SuperstepResult) -> Self {
        Self {
            run_id: result.run_id,
            status: result.status,
            step: result.step,
            checkpoint_id: result.checkpoint_id,
            values: result.values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Done.is_terminal());
        assert!(RunStatus::InterruptedAfter { nodes: vec![] }.is_interrupted());
        assert!(!RunStatus::Failed { reason: "x".into() }.is_interrupted());
    }

    #[test]
    fn test_status_serializes_tagged() {
        let value = serde_json::to_value(RunStatus::InterruptedBefore {
            nodes: vec!["review".into()],
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({"status": "interrupted_before", "nodes": ["review"]}));
    }
}
