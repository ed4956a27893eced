//! Error types for channel and checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during channel and checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Read of a channel that holds no value
    #[error("Channel is empty: {0}")]
    EmptyChannel(String),

    /// Update rejected by the channel
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// Checkpoint not found
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Stored data could not be decoded or restored
    #[error("Checkpoint {checkpoint_id} is corrupt: {reason}")]
    Corruption {
        checkpoint_id: String,
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    /// Create a corruption error for the given checkpoint
    pub fn corruption(checkpoint_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corruption {
            checkpoint_id: checkpoint_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error reports an empty channel read
    pub fn is_empty_channel(&self) -> bool {
        matches!(self, Self::EmptyChannel(_))
    }
}
