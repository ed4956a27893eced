//! # stepgraph-core - Checkpointed Superstep Graph Execution
//!
//! Run graphs of async nodes that communicate through typed channels, one
//! synchronized superstep at a time, with a durable checkpoint after every
//! superstep.
//!
//! ## Overview
//!
//! - **Channels** - named state cells ([`LastValueChannel`], [`TopicChannel`],
//!   [`BinaryOperatorChannel`]) holding the whole state of a run
//! - **Nodes** - async callables ([`NodeExecutor`], [`node_fn`]) that read
//!   channels and return writes, pushes, halt or interrupt requests
//! - **Supersteps** - every triggered node runs concurrently against the same
//!   snapshot; writes are applied together at the barrier
//! - **Checkpoints** - the state after every superstep is persisted through a
//!   [`CheckpointSaver`] before it becomes visible
//! - **Resume** - any checkpoint can be loaded to continue, or branch, a run
//! - **Interrupts** - pause before or after chosen nodes for human review
//!
//! ## Execution Model
//!
//! ```text
//!          ┌──────────── superstep N ────────────┐
//!  input ─►│ plan ─► execute (parallel) ─► apply │─► checkpoint N ─► superstep N+1
//!          └─────────────────────────────────────┘
//! ```
//!
//! Within a superstep tasks never observe each other's writes. Writes are
//! applied in a deterministic task order, so the same input always produces
//! the same sequence of checkpoints.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stepgraph_core::{node_fn, GraphBuilder, NodeOutput, NodeSpec, RunStatus};
//! use stepgraph_checkpoint::LastValueChannel;
//! use serde_json::json;
//! use std::collections::BTreeMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), stepgraph_core::GraphError> {
//!     let mut builder = GraphBuilder::new();
//!     builder
//!         .add_channel("x", LastValueChannel::new())
//!         .add_channel("y", LastValueChannel::new())
//!         .add_node(
//!             NodeSpec::new("double", node_fn(|input| async move {
//!                 let x = input.require("x")?.as_i64().unwrap_or(0);
//!                 Ok(NodeOutput::new().write("y", json!(x * 2)))
//!             }))
//!             .reads(["x"])
//!             .writes(["y"]),
//!         )
//!         .set_entry_point("double");
//!
//!     let graph = builder.compile()?;
//!     let outcome = graph
//!         .invoke("run-1", BTreeMap::from([("x".to_string(), json!(21))]))
//!         .await?;
//!
//!     assert_eq!(outcome.status, RunStatus::Done);
//!     assert_eq!(outcome.values["y"], json!(42));
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! let mut handle = graph.stream("run-2", input).await?;
//! while let Some(step) = handle.next().await {
//!     let step = step?;
//!     println!("step {} -> {:?}", step.step, step.status);
//! }
//! ```

pub mod cancel;
pub mod compiled;
pub mod config;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod node;
pub mod pregel;
pub mod push;
pub mod retry;
pub mod stream;

pub use cancel::CancellationHandle;
pub use compiled::{new_run_id, CompiledGraph, RunHandle};
pub use config::RunConfig;
pub use error::{GraphError, Result};
pub use graph::{GraphBuilder, NodeSpec};
pub use interrupt::InterruptWhen;
pub use node::{node_fn, FnNode, NodeExecutor, NodeFuture, NodeInput, NodeOutput};
pub use pregel::{SuperstepLoop, TaskKind};
pub use push::Push;
pub use retry::RetryPolicy;
pub use stream::{RunOutcome, RunStatus, SuperstepResult, TaskSummary};

pub use stepgraph_checkpoint::{
    BinaryOperatorChannel, Channel, Checkpoint, CheckpointSaver, FileCheckpointSaver, InMemoryCheckpointSaver,
    LastValueChannel, TopicChannel,
};
