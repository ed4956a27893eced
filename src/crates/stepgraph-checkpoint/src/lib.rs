//! # stepgraph-checkpoint - Channels and Checkpoint Persistence
//!
//! State primitives for the stepgraph superstep engine:
//!
//! - **Channels** ([`Channel`]) - named state cells that nodes communicate through.
//!   [`LastValueChannel`] keeps one value, [`TopicChannel`] accumulates an
//!   ordered list until consumed, [`BinaryOperatorChannel`] folds updates
//!   through a reducer.
//! - **Checkpoints** ([`Checkpoint`]) - immutable snapshots of a run taken at
//!   every superstep boundary.
//! - **Stores** ([`CheckpointSaver`]) - pluggable persistence.
//!   [`InMemoryCheckpointSaver`] for tests and short-lived processes,
//!   [`FileCheckpointSaver`] for durable local storage.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stepgraph_checkpoint::{Checkpoint, CheckpointSaver, InMemoryCheckpointSaver};
//! use std::collections::BTreeMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = InMemoryCheckpointSaver::new();
//!
//!     let mut values = BTreeMap::new();
//!     values.insert("x".to_string(), serde_json::json!(1));
//!     let id = saver.put(&Checkpoint::input("run-1", values)).await?;
//!
//!     let latest = saver.latest("run-1").await?.expect("just saved");
//!     assert_eq!(latest.id, id);
//!     Ok(())
//! }
//! ```
//!
//! ## Channel semantics
//!
//! ```rust
//! use stepgraph_checkpoint::{Channel, LastValueChannel, TopicChannel};
//! use serde_json::json;
//!
//! let mut last = LastValueChannel::new();
//! assert!(last.update(vec![json!(1)]).unwrap());
//! assert!(!last.update(vec![json!(1)]).unwrap()); // same value, no change
//!
//! let mut topic = TopicChannel::new();
//! topic.update(vec![json!("a")]).unwrap();
//! topic.update(vec![json!("b")]).unwrap();
//! assert_eq!(topic.get().unwrap(), json!(["a", "b"]));
//! assert!(topic.consume());
//! assert!(!topic.consume());
//! ```

pub mod channels;
pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use channels::{BinaryOperatorChannel, Channel, ChannelKind, LastValueChannel, ReducerFn, TopicChannel};
pub use checkpoint::{
    Checkpoint, CheckpointId, CheckpointMetadata, CheckpointSource, InterruptRegistrations, PendingSend,
    PendingWrite, CURRENT_VERSION,
};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointSaver;
pub use memory::InMemoryCheckpointSaver;
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use traits::{CheckpointSaver, CheckpointStream};
