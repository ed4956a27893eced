//! Error types for graph compilation and execution

use stepgraph_checkpoint::CheckpointError;
use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while compiling or running a graph
#[derive(Error, Debug)]
pub enum GraphError {
    /// Read of a channel that holds no value
    #[error("Channel '{0}' is empty")]
    EmptyChannel(String),

    /// A task failed on every attempt its retry policy allowed
    #[error("Task '{task_id}' of node '{node}' failed after {attempts} attempt(s): {error}")]
    TaskExecution {
        node: String,
        task_id: String,
        attempts: usize,
        error: String,
    },

    /// The run needed more supersteps than the configured limit
    #[error("Recursion limit of {limit} supersteps exceeded")]
    RecursionLimitExceeded { limit: u64 },

    /// Graph definition references something that does not exist
    #[error("Malformed graph: {0}")]
    MalformedGraph(String),

    /// A stored checkpoint could not be decoded or restored
    #[error("Checkpoint '{checkpoint_id}' is corrupt: {reason}")]
    CheckpointCorruption { checkpoint_id: String, reason: String },

    /// Error raised by a node callable
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution { node: String, error: String },

    /// A node wrote to a channel outside its declared outputs
    #[error("Node '{node}' wrote to undeclared channel '{channel}'")]
    InvalidWrite { node: String, channel: String },

    /// A node pushed to a node that is not part of the graph
    #[error("Node '{node}' pushed to unknown node '{target}'")]
    InvalidPush { node: String, target: String },

    /// `start` was called with a run id that already has checkpoints
    #[error("Run '{0}' already exists")]
    RunExists(String),

    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[source] CheckpointError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    pub fn corruption(checkpoint_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CheckpointCorruption {
            checkpoint_id: checkpoint_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether a task that failed with this error may be attempted again
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidWrite { .. }
                | Self::InvalidPush { .. }
                | Self::MalformedGraph(_)
                | Self::Cancelled(_)
                | Self::Configuration(_)
                | Self::RunExists(_)
        )
    }
}

impl From<CheckpointError> for GraphError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Corruption { checkpoint_id, reason } => Self::CheckpointCorruption { checkpoint_id, reason },
            other => Self::Checkpoint(other),
        }
    }
}
