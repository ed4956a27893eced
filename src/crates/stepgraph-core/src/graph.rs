//! Graph definition and compilation
//!
//! A graph is a set of named channels plus a set of nodes that read from and
//! write to them. Edges are implicit: a node runs in the superstep after one
//! of its trigger channels changes.
//!
//! ```text
//!   input ──► [extract] ──► entities ──► [link] ──► links
//!                                 │
//!                                 └────► [count] ──► total (BinaryOperator: sum)
//! ```
//!
//! # Example
//!
//! ```rust
//! use stepgraph_core::{node_fn, GraphBuilder, NodeOutput, NodeSpec};
//! use stepgraph_checkpoint::LastValueChannel;
//! use serde_json::json;
//!
//! let mut builder = GraphBuilder::new();
//! builder
//!     .add_channel("input", LastValueChannel::new())
//!     .add_channel("output", LastValueChannel::new())
//!     .add_node(
//!         NodeSpec::new("upper", node_fn(|input| async move {
//!             let text = input.require("input")?.as_str().unwrap_or_default().to_uppercase();
//!             Ok(NodeOutput::new().write("output", json!(text)))
//!         }))
//!         .reads(["input"])
//!         .writes(["output"]),
//!     )
//!     .set_entry_point("upper");
//!
//! let graph = builder.compile().unwrap();
//! assert_eq!(graph.node_names(), vec!["upper".to_string()]);
//! ```

use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::node::{reserved, NodeExecutor};
use crate::pregel::{DependencyIndex, PregelGraph, PregelNode};
use crate::retry::RetryPolicy;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use stepgraph_checkpoint::Channel;

/// Declaration of one node
#[derive(Clone)]
pub struct NodeSpec {
    name: String,
    reads: Vec<String>,
    writes: BTreeSet<String>,
    triggers: Option<Vec<String>>,
    retry_policy: Option<RetryPolicy>,
    executor: Arc<dyn NodeExecutor>,
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .field("triggers", &self.triggers)
            .finish_non_exhaustive()
    }
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, executor: impl NodeExecutor + 'static) -> Self {
        Self::with_executor(name, Arc::new(executor))
    }

    /// Share one executor between several nodes
    pub fn with_executor(name: impl Into<String>, executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            name: name.into(),
            reads: Vec::new(),
            writes: BTreeSet::new(),
            triggers: None,
            retry_policy: None,
            executor,
        }
    }

    /// Channels forming the node's input; all must hold a value for it to run
    pub fn reads<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for channel in channels {
            let channel = channel.into();
            if !self.reads.contains(&channel) {
                self.reads.push(channel);
            }
        }
        self
    }

    /// Channels the node is allowed to write
    pub fn writes<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes.extend(channels.into_iter().map(Into::into));
        self
    }

    /// Channels whose change schedules the node; defaults to its reads
    pub fn triggers<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.triggers = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Builder for a [`CompiledGraph`]
#[derive(Debug, Default)]
pub struct GraphBuilder {
    channels: BTreeMap<String, Box<dyn Channel>>,
    nodes: BTreeMap<String, NodeSpec>,
    entry_points: BTreeSet<String>,
    /// Problems found while adding items, reported by `compile`
    problems: Vec<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&mut self, name: impl Into<String>, channel: impl Channel + 'static) -> &mut Self {
        let name = name.into();
        if self.channels.contains_key(&name) {
            self.problems.push(format!("duplicate channel '{name}'"));
        } else {
            self.channels.insert(name, Box::new(channel));
        }
        self
    }

    pub fn add_node(&mut self, spec: NodeSpec) -> &mut Self {
        if self.nodes.contains_key(&spec.name) {
            self.problems.push(format!("duplicate node '{}'", spec.name));
        } else {
            self.nodes.insert(spec.name.clone(), spec);
        }
        self
    }

    /// Node executed in the first superstep
    pub fn set_entry_point(&mut self, node: impl Into<String>) -> &mut Self {
        self.entry_points.insert(node.into());
        self
    }

    pub fn set_entry_points<I, S>(&mut self, nodes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_points.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Validate the definition and build the dependency index
    ///
    /// # Errors
    ///
    /// [`GraphError::MalformedGraph`] listing the first problem found:
    /// duplicates, reserved `__` names, references to unknown channels, no
    /// nodes, or missing/unknown entry points.
    pub fn compile(self) -> Result<CompiledGraph> {
        let graph = self.build()?;
        tracing::debug!(
            nodes = graph.nodes.len(),
            channels = graph.channels.len(),
            entry = ?graph.entry_nodes,
            "Graph compiled"
        );
        Ok(CompiledGraph::new(Arc::new(graph)))
    }

    fn build(self) -> Result<PregelGraph> {
        if let Some(problem) = self.problems.first() {
            return Err(GraphError::MalformedGraph(problem.clone()));
        }
        if self.nodes.is_empty() {
            return Err(GraphError::MalformedGraph("graph has no nodes".to_string()));
        }

        for name in self.channels.keys() {
            if reserved::is_reserved(name) {
                return Err(GraphError::MalformedGraph(format!("channel name '{name}' is reserved")));
            }
        }

        let check_channel = |node: &str, role: &str, channel: &str| -> Result<()> {
            if self.channels.contains_key(channel) {
                Ok(())
            } else {
                Err(GraphError::MalformedGraph(format!(
                    "node '{node}' {role} unknown channel '{channel}'"
                )))
            }
        };

        let mut nodes = BTreeMap::new();
        for (name, spec) in &self.nodes {
            if reserved::is_reserved(name) {
                return Err(GraphError::MalformedGraph(format!("node name '{name}' is reserved")));
            }
            let triggers = spec.triggers.clone().unwrap_or_else(|| spec.reads.clone());
            for channel in &spec.reads {
                check_channel(name, "reads", channel)?;
            }
            for channel in &spec.writes {
                check_channel(name, "writes", channel)?;
            }
            for channel in &triggers {
                check_channel(name, "is triggered by", channel)?;
            }
            if let Some(policy) = &spec.retry_policy {
                policy
                    .validate()
                    .map_err(|e| GraphError::Configuration(format!("node '{name}': {e}")))?;
            }

            nodes.insert(
                name.clone(),
                PregelNode {
                    name: name.clone(),
                    reads: spec.reads.clone(),
                    writes: spec.writes.clone(),
                    triggers,
                    retry_policy: spec.retry_policy.clone(),
                    executor: Arc::clone(&spec.executor),
                },
            );
        }

        if self.entry_points.is_empty() {
            return Err(GraphError::MalformedGraph("no entry point set".to_string()));
        }
        if let Some(unknown) = self.entry_points.iter().find(|n| !nodes.contains_key(*n)) {
            return Err(GraphError::MalformedGraph(format!("entry point '{unknown}' is not a node")));
        }

        let index = DependencyIndex::from_triggers(
            nodes
                .values()
                .map(|node: &PregelNode| (node.name.as_str(), node.triggers.iter().map(String::as_str))),
        );

        Ok(PregelGraph {
            channels: self.channels,
            nodes,
            entry_nodes: self.entry_points,
            index,
        })
    }
}
