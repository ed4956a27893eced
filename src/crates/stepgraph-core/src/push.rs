//! Explicit messages from one node to another
//!
//! A node that returns a [`Push`] schedules a PUSH task for the target node in
//! the next superstep, independent of channel state. The payload becomes the
//! task's input.
//!
//! ```rust
//! use stepgraph_core::{NodeOutput, Push};
//! use serde_json::json;
//!
//! // Fan out one task per item
//! let items = vec![1, 2, 3];
//! let output = items
//!     .into_iter()
//!     .fold(NodeOutput::new(), |out, item| out.push(Push::new("worker", json!({"item": item}))));
//! assert_eq!(output.pushes.len(), 3);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepgraph_checkpoint::PendingSend;

/// Message scheduling a PUSH task for `node`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Push {
    pub node: String,
    pub payload: Value,
}

impl Push {
    pub fn new(node: impl Into<String>, payload: Value) -> Self {
        Self {
            node: node.into(),
            payload,
        }
    }
}

impl From<Push> for PendingSend {
    fn from(push: Push) -> Self {
        PendingSend::new(push.node, push.payload)
    }
}

impl From<PendingSend> for Push {
    fn from(send: PendingSend) -> Self {
        Push::new(send.node, send.payload)
    }
}
