//! Pregel-style superstep execution engine
//!
//! Execution is divided into **supersteps**:
//!
//! 1. **Plan**: nodes triggered by the previous superstep's channel updates,
//!    plus one task per pending push, become the tasks of this superstep
//! 2. **Execute**: tasks run concurrently and only see the channel state from
//!    before the superstep
//! 3. **Barrier**: wait for every task to finish
//! 4. **Apply**: buffered writes are applied in task order
//! 5. **Checkpoint**: the new state is persisted before it becomes visible
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Superstep N                                         │
//! │                                                      │
//! │  plan_next_tasks ──► TaskExecutor ──► apply_writes   │
//! │        ▲               (parallel)          │         │
//! │        │                                   ▼         │
//! │  DependencyIndex                    CheckpointSaver  │
//! └──────────────────────────────────────────────────────┘
//!                          │
//!            tasks left? ──┴── yes: superstep N+1, no: Done
//! ```
//!
//! # Key Components
//!
//! - [`SuperstepLoop`] drives one run and owns its [`GraphState`]
//! - [`TaskExecutor`] runs the tasks of a superstep with retries, a
//!   concurrency bound and a step timeout
//! - [`DependencyIndex`] maps channels to the nodes they trigger
//! - [`algo`] holds the pure planning and write application functions

pub mod algo;
pub mod executor;
pub mod index;
pub mod loop_impl;
pub mod state;
pub mod types;

pub use algo::{apply_writes, plan_next_tasks, validate_outputs};
pub use executor::{SuperstepFailure, TaskExecutor};
pub use index::DependencyIndex;
pub use loop_impl::SuperstepLoop;
pub use state::{ChannelSet, GraphState};
pub use types::{PregelGraph, PregelNode, Task, TaskKind, TaskOutput, TaskPath};
