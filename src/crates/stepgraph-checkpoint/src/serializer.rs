//! Serialization protocol used by on-disk stores

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Encoding of stored snapshots
///
/// Channel values are arbitrary JSON, so implementations must use a
/// self-describing format.
pub trait SerializerProtocol: Send + Sync {
    /// File extension written by this serializer, without the dot
    fn extension(&self) -> &'static str;

    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;
}

/// JSON serializer, compact by default
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indented output, handy when checkpoints are inspected by hand
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl SerializerProtocol for JsonSerializer {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        if self.pretty {
            Ok(serde_json::to_vec_pretty(value)?)
        } else {
            Ok(serde_json::to_vec(value)?)
        }
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}
