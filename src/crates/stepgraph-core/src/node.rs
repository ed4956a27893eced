//! Node callables and their inputs and outputs
//!
//! A node is an opaque async function. It receives a [`NodeInput`] snapshot
//! and returns a [`NodeOutput`] describing what it wants to happen: channel
//! writes, pushes to other nodes, early termination, or interrupt requests.
//! Nodes never touch channels directly; the superstep loop applies their
//! outputs once every task of the superstep has finished.

use crate::error::{GraphError, Result};
use crate::interrupt::InterruptWhen;
use crate::pregel::types::TaskKind;
use crate::push::Push;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Reserved channel names used when a task output is logged as pending writes
pub mod reserved {
    pub const PUSH: &str = "__push__";
    pub const HALT: &str = "__halt__";
    pub const INTERRUPT: &str = "__interrupt__";
    pub const DONE: &str = "__done__";

    /// Whether `name` is in the namespace reserved for the engine
    pub fn is_reserved(name: &str) -> bool {
        name.starts_with("__")
    }
}

/// Input handed to a node callable
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInput {
    pub task_id: String,
    pub node: String,
    pub kind: TaskKind,
    /// Supersteps completed before this one
    pub step: u64,
    /// 1-based attempt number, incremented on every retry
    pub attempt: usize,
    /// Current value of each read channel (PULL tasks)
    pub values: BTreeMap<String, Value>,
    /// Pushed payload (PUSH tasks)
    pub payload: Option<Value>,
}

impl NodeInput {
    /// Value of a read channel
    pub fn get(&self, channel: &str) -> Option<&Value> {
        self.values.get(channel)
    }

    /// Value of a read channel, failing like an empty channel when absent
    pub fn require(&self, channel: &str) -> Result<&Value> {
        self.values
            .get(channel)
            .ok_or_else(|| GraphError::EmptyChannel(channel.to_string()))
    }
}

/// What a node asks the engine to do once its superstep completes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    /// `(channel, value)` writes, applied in this order
    pub writes: Vec<(String, Value)>,
    /// PUSH tasks for the next superstep
    pub pushes: Vec<Push>,
    /// Stop the whole run after this superstep
    pub halt: bool,
    /// Pause around this node the next time it is scheduled
    pub interrupts: Vec<InterruptWhen>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(mut self, channel: impl Into<String>, value: Value) -> Self {
        self.writes.push((channel.into(), value));
        self
    }

    pub fn push(mut self, push: Push) -> Self {
        self.pushes.push(push);
        self
    }

    pub fn halt(mut self) -> Self {
        self.halt = true;
        self
    }

    pub fn interrupt(mut self, when: InterruptWhen) -> Self {
        if !self.interrupts.contains(&when) {
            self.interrupts.push(when);
        }
        self
    }

    /// Encode as pending writes for the checkpoint store
    pub(crate) fn to_pending_writes(&self) -> Vec<(String, Value)> {
        let mut encoded = self.writes.clone();
        encoded.extend(self.pushes.iter().map(|p| {
            (
                reserved::PUSH.to_string(),
                serde_json::json!({"node": p.node, "payload": p.payload}),
            )
        }));
        if self.halt {
            encoded.push((reserved::HALT.to_string(), Value::Bool(true)));
        }
        encoded.extend(
            self.interrupts
                .iter()
                .map(|when| (reserved::INTERRUPT.to_string(), Value::String(when.to_string()))),
        );
        // Marks the task as finished even when it produced nothing
        encoded.push((reserved::DONE.to_string(), Value::Null));
        encoded
    }

    /// Decode pending writes logged by [`NodeOutput::to_pending_writes`]
    ///
    /// Returns `None` when the record is incomplete.
    pub(crate) fn from_pending_writes<'a, I>(writes: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let mut output = NodeOutput::new();
        let mut done = false;
        for (channel, value) in writes {
            match channel {
                reserved::PUSH => {
                    let node = value.get("node")?.as_str()?;
                    let payload = value.get("payload").cloned().unwrap_or(Value::Null);
                    output.pushes.push(Push::new(node, payload));
                }
                reserved::HALT => output.halt = true,
                reserved::INTERRUPT => output.interrupts.push(value.as_str()?.parse().ok()?),
                reserved::DONE => done = true,
                _ => output.writes.push((channel.to_string(), value.clone())),
            }
        }
        done.then_some(output)
    }
}

/// Boxed future returned by node callables
pub type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<NodeOutput>> + Send + 'a>>;

/// Trait for executing nodes
///
/// Implement this for stateful nodes; wrap plain async closures with
/// [`node_fn`].
pub trait NodeExecutor: Send + Sync {
    fn execute(&self, input: NodeInput) -> NodeFuture<'_>;
}

/// Node backed by an async closure
pub struct FnNode<F> {
    func: F,
}

impl<F, Fut> NodeExecutor for FnNode<F>
where
    F: Fn(NodeInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<NodeOutput>> + Send + 'static,
{
    fn execute(&self, input: NodeInput) -> NodeFuture<'_> {
        Box::pin((self.func)(input))
    }
}

/// Wrap an async closure as a node
///
/// ```rust
/// use stepgraph_core::{node_fn, NodeOutput};
/// use serde_json::json;
///
/// let double = node_fn(|input| async move {
///     let x = input.require("x")?.as_i64().unwrap_or(0);
///     Ok(NodeOutput::new().write("y", json!(x * 2)))
/// });
/// # let _ = double;
/// ```
pub fn node_fn<F, Fut>(func: F) -> FnNode<F>
where
    F: Fn(NodeInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<NodeOutput>> + Send + 'static,
{
    FnNode { func }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(encoded: &[(String, Value)]) -> Option<NodeOutput> {
        NodeOutput::from_pending_writes(encoded.iter().map(|(c, v)| (c.as_str(), v)))
    }

    #[test]
    fn test_pending_write_encoding_keeps_everything() {
        let output = NodeOutput::new()
            .write("a", json!(1))
            .write("b", json!({"k": "v"}))
            .push(Push::new("worker", json!([1, 2])))
            .halt()
            .interrupt(InterruptWhen::After);

        assert_eq!(decode(&output.to_pending_writes()), Some(output));
    }

    #[test]
    fn test_empty_output_still_recorded() {
        let encoded = NodeOutput::new().to_pending_writes();
        assert_eq!(encoded.len(), 1);
        assert_eq!(decode(&encoded), Some(NodeOutput::new()));
    }

    #[test]
    fn test_incomplete_record_is_rejected() {
        let encoded = vec![("a".to_string(), json!(1))];
        assert_eq!(decode(&encoded), None);
    }

    #[test]
    fn test_interrupt_requests_deduplicate() {
        let output = NodeOutput::new()
            .interrupt(InterruptWhen::Before)
            .interrupt(InterruptWhen::Before);
        assert_eq!(output.interrupts, vec![InterruptWhen::Before]);
    }

    #[tokio::test]
    async fn test_node_fn_executes() {
        let node = node_fn(|input: NodeInput| async move {
            let x = input.require("x")?.as_i64().unwrap_or(0);
            Ok(NodeOutput::new().write("y", json!(x + 1)))
        });

        let mut values = BTreeMap::new();
        values.insert("x".to_string(), json!(41));
        let input = NodeInput {
            task_id: "t".to_string(),
            node: "inc".to_string(),
            kind: TaskKind::Pull,
            step: 0,
            attempt: 1,
            values,
            payload: None,
        };

        let output = node.execute(input.clone()).await.unwrap();
        assert_eq!(output.writes, vec![("y".to_string(), json!(42))]);

        let missing = NodeInput {
            values: BTreeMap::new(),
            ..input
        };
        assert!(matches!(node.execute(missing).await, Err(GraphError::EmptyChannel(_))));
    }
}
