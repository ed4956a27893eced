//! Core Pregel algorithm functions.
//!
//! - [`plan_next_tasks`] decides which nodes run in the coming superstep
//! - [`validate_outputs`] rejects task outputs that break the graph contract
//! - [`apply_writes`] folds the buffered outputs of a superstep into the channels
//!
//! All three are pure with respect to I/O; the superstep loop owns persistence.
//!
//! # Planning
//!
//! ```text
//!  checkpoint.pending_sends ──► PUSH tasks (one per send, in send order)
//!
//!  step 0 ──► entry nodes ─┐
//!                          ├─► candidates (sorted) ──► inputs non-empty? ──► PULL tasks
//!  step n ──► index.nodes_triggered_by(updated_channels) ─┘
//! ```
//!
//! PUSH and PULL tasks for the same node are both scheduled. Tasks come back
//! sorted by [`TaskPath`], which is also the order their writes are applied in.

use crate::error::{GraphError, Result};
use crate::node::{reserved, NodeInput};
use crate::pregel::state::ChannelSet;
use crate::pregel::types::{PregelGraph, Task, TaskKind, TaskOutput, TaskPath};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use stepgraph_checkpoint::{Checkpoint, PendingSend};

/// Compute the tasks of the next superstep.
///
/// * `checkpoint` - latest checkpoint; its id seeds task ids and its step
///   decides whether entry nodes are seeded
/// * `updated_channels` - channels changed by the previous superstep
/// * `pending_sends` - pushes produced by the previous superstep
///
/// A halted checkpoint plans nothing. A candidate whose read channels are
/// not all available is skipped silently.
pub fn plan_next_tasks(
    checkpoint: &Checkpoint,
    graph: &PregelGraph,
    channels: &ChannelSet,
    updated_channels: &BTreeSet<String>,
    pending_sends: &[PendingSend],
) -> Result<Vec<Task>> {
    if checkpoint.halted {
        return Ok(Vec::new());
    }

    let mut tasks = Vec::with_capacity(pending_sends.len());

    for (index, send) in pending_sends.iter().enumerate() {
        let node = graph.nodes.get(&send.node).ok_or_else(|| GraphError::InvalidPush {
            node: "__checkpoint__".to_string(),
            target: send.node.clone(),
        })?;
        let path = TaskPath::push(index, &node.name);
        let id = path.task_id(&checkpoint.id);
        tasks.push(Task {
            input: NodeInput {
                task_id: id.clone(),
                node: node.name.clone(),
                kind: TaskKind::Push,
                step: checkpoint.step,
                attempt: 1,
                values: BTreeMap::new(),
                payload: Some(send.payload.clone()),
            },
            id,
            path,
            // PUSH tasks are not subscribed to any channel
            reads: Vec::new(),
            retry_policy: node.retry_policy.clone(),
            executor: Arc::clone(&node.executor),
        });
    }

    let candidates: BTreeSet<String> = if checkpoint.is_initial() {
        graph.entry_nodes.clone()
    } else {
        graph.index.nodes_triggered_by(updated_channels)
    };

    for name in &candidates {
        let Some(node) = graph.nodes.get(name) else {
            continue;
        };
        if !node.reads.iter().all(|channel| channels.is_available(channel)) {
            tracing::trace!(node = %name, "Skipping candidate with empty inputs");
            continue;
        }

        let mut values = BTreeMap::new();
        for channel in &node.reads {
            values.insert(channel.clone(), channels.get(channel)?);
        }

        let path = TaskPath::pull(name);
        let id = path.task_id(&checkpoint.id);
        tasks.push(Task {
            input: NodeInput {
                task_id: id.clone(),
                node: name.clone(),
                kind: TaskKind::Pull,
                step: checkpoint.step,
                attempt: 1,
                values,
                payload: None,
            },
            id,
            path,
            reads: node.reads.clone(),
            retry_policy: node.retry_policy.clone(),
            executor: Arc::clone(&node.executor),
        });
    }

    tasks.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(tasks)
}

/// Check every output against its node's declared writes and the node set.
pub fn validate_outputs(graph: &PregelGraph, outputs: &[TaskOutput]) -> Result<()> {
    for output in outputs {
        let node = graph
            .nodes
            .get(output.node())
            .ok_or_else(|| GraphError::MalformedGraph(format!("output from unknown node '{}'", output.node())))?;

        for (channel, _) in &output.output.writes {
            if reserved::is_reserved(channel) || !node.writes.contains(channel) {
                return Err(GraphError::InvalidWrite {
                    node: node.name.clone(),
                    channel: channel.clone(),
                });
            }
        }
        for push in &output.output.pushes {
            if !graph.nodes.contains_key(&push.node) {
                return Err(GraphError::InvalidPush {
                    node: node.name.clone(),
                    target: push.node.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Apply the outputs of a finished superstep to `channels`.
///
/// Outputs are processed in task-path order. First every PULL task consumes
/// the channels it read, then writes are grouped per channel (keeping task
/// order, then per-write order) and each channel receives a single update.
/// Several writes to a LastValue channel therefore resolve to the last one.
///
/// Returns the channels whose value changed. On error `channels` may be
/// partially updated; callers apply to a scratch copy.
pub fn apply_writes(channels: &mut ChannelSet, outputs: &[TaskOutput]) -> Result<BTreeSet<String>> {
    let mut ordered: Vec<&TaskOutput> = outputs.iter().collect();
    ordered.sort_by(|a, b| a.path.cmp(&b.path));

    for output in &ordered {
        for channel in &output.reads {
            channels.consume(channel);
        }
    }

    let mut pending: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
    for output in &ordered {
        for (channel, value) in &output.output.writes {
            pending.entry(channel.as_str()).or_default().push(value.clone());
        }
    }

    let mut updated = BTreeSet::new();
    for (channel, values) in pending {
        if channels.update(channel, values)? {
            updated.insert(channel.to_string());
        }
    }
    Ok(updated)
}
