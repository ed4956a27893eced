//! Channel abstractions for state management
//!
//! A channel is the only piece of mutable state a graph has. Nodes never touch
//! channels directly; the superstep loop feeds the buffered writes of a whole
//! superstep into [`Channel::update`] once every task has finished.

use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Kind of a channel, recorded for diagnostics and graph introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    LastValue,
    Topic,
    BinaryOperator,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::LastValue => write!(f, "last_value"),
            ChannelKind::Topic => write!(f, "topic"),
            ChannelKind::BinaryOperator => write!(f, "binary_operator"),
        }
    }
}

/// Base trait for all channels
///
/// Channels are typed state containers that manage how state is stored,
/// updated, and checkpointed. Different channel types provide different
/// semantics for handling several updates within one superstep.
pub trait Channel: Send + Sync + Debug {
    /// Kind of this channel
    fn kind(&self) -> ChannelKind;

    /// Get the current value of the channel
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::EmptyChannel`] if the channel holds no value
    fn get(&self) -> Result<Value>;

    /// Apply a sequence of updates collected during one superstep
    ///
    /// Values arrive in deterministic task order. Returns `true` only if the
    /// stored value differs from what it was before the call.
    fn update(&mut self, values: Vec<Value>) -> Result<bool>;

    /// Serializable snapshot of the channel, `None` when empty
    fn checkpoint(&self) -> Option<Value>;

    /// Replace the channel state with a snapshot produced by [`Channel::checkpoint`]
    fn restore(&mut self, snapshot: Option<Value>) -> Result<()>;

    /// Check if the channel has a value (is not empty)
    fn is_available(&self) -> bool {
        self.get().is_ok()
    }

    /// Notify the channel that a subscribed task ran
    ///
    /// Returns `true` if anything was consumed.
    fn consume(&mut self) -> bool {
        false
    }

    /// An empty channel of the same kind and configuration
    fn fresh(&self) -> Box<dyn Channel>;

    /// Clone the channel into a Box
    fn clone_box(&self) -> Box<dyn Channel>;
}

impl Clone for Box<dyn Channel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// LastValue channel - stores only the latest value
///
/// Several values in one update resolve to the last one. An update that leaves
/// the stored value unchanged reports no change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastValueChannel {
    value: Option<Value>,
    default: Option<Value>,
}

impl LastValueChannel {
    /// Create a new LastValue channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a LastValue channel that reads as `default` until first written
    ///
    /// The default is configuration, not state: it never appears in a checkpoint.
    pub fn with_default(default: Value) -> Self {
        Self {
            value: None,
            default: Some(default),
        }
    }
}

impl Channel for LastValueChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::LastValue
    }

    fn get(&self) -> Result<Value> {
        self.value
            .as_ref()
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| CheckpointError::EmptyChannel("last_value channel has no value".to_string()))
    }

    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        let Some(next) = values.into_iter().last() else {
            return Ok(false);
        };
        if self.value.as_ref() == Some(&next) {
            return Ok(false);
        }
        self.value = Some(next);
        Ok(true)
    }

    fn checkpoint(&self) -> Option<Value> {
        self.value.clone()
    }

    fn restore(&mut self, snapshot: Option<Value>) -> Result<()> {
        self.value = snapshot;
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.value.is_some() || self.default.is_some()
    }

    fn fresh(&self) -> Box<dyn Channel> {
        Box::new(Self {
            value: None,
            default: self.default.clone(),
        })
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// Topic channel - ordered accumulator of values
///
/// Every update appends; values stay until a subscribed task consumes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicChannel {
    values: Vec<Value>,
}

impl TopicChannel {
    /// Create a new Topic channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all accumulated values
    pub fn get_all(&self) -> &[Value] {
        &self.values
    }

    /// Number of accumulated values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is accumulated
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Channel for TopicChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Topic
    }

    fn get(&self) -> Result<Value> {
        if self.values.is_empty() {
            return Err(CheckpointError::EmptyChannel("topic channel has no values".to_string()));
        }
        Ok(Value::Array(self.values.clone()))
    }

    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        self.values.extend(values);
        Ok(true)
    }

    fn checkpoint(&self) -> Option<Value> {
        if self.values.is_empty() {
            None
        } else {
            Some(Value::Array(self.values.clone()))
        }
    }

    fn restore(&mut self, snapshot: Option<Value>) -> Result<()> {
        match snapshot {
            None => {
                self.values.clear();
                Ok(())
            }
            Some(Value::Array(values)) => {
                self.values = values;
                Ok(())
            }
            Some(other) => Err(CheckpointError::InvalidUpdate(format!(
                "topic snapshot must be an array, got {other}"
            ))),
        }
    }

    fn is_available(&self) -> bool {
        !self.values.is_empty()
    }

    fn consume(&mut self) -> bool {
        if self.values.is_empty() {
            return false;
        }
        self.values.clear();
        true
    }

    fn fresh(&self) -> Box<dyn Channel> {
        Box::new(Self::new())
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// Reducer function type for BinaryOperator channel
pub type ReducerFn = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;

/// BinaryOperator channel - folds every update through a reducer
#[derive(Clone)]
pub struct BinaryOperatorChannel {
    value: Option<Value>,
    reducer: ReducerFn,
}

impl BinaryOperatorChannel {
    /// Create a new BinaryOperator channel with a custom reducer
    pub fn new<F>(reducer: F) -> Self
    where
        F: Fn(Value, Value) -> Value + Send + Sync + 'static,
    {
        Self {
            value: None,
            reducer: Arc::new(reducer),
        }
    }

    /// Numeric sum; integers stay integers
    pub fn sum() -> Self {
        Self::new(|a, b| match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Value::from(x.saturating_add(y)),
            _ => serde_json::json!(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)),
        })
    }

    /// Array concatenation; scalars are appended as single elements
    pub fn append() -> Self {
        Self::new(|a, b| {
            let mut result = match a {
                Value::Array(arr) => arr,
                other => vec![other],
            };
            match b {
                Value::Array(arr) => result.extend(arr),
                other => result.push(other),
            }
            Value::Array(result)
        })
    }
}

impl Debug for BinaryOperatorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryOperatorChannel")
            .field("value", &self.value)
            .field("reducer", &"<function>")
            .finish()
    }
}

impl Channel for BinaryOperatorChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::BinaryOperator
    }

    fn get(&self) -> Result<Value> {
        self.value
            .clone()
            .ok_or_else(|| CheckpointError::EmptyChannel("binary_operator channel has no value".to_string()))
    }

    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        let previous = self.value.clone();
        let mut acc = self.value.take();
        for value in values {
            acc = Some(match acc {
                Some(current) => (self.reducer)(current, value),
                None => value,
            });
        }
        self.value = acc;
        Ok(self.value != previous)
    }

    fn checkpoint(&self) -> Option<Value> {
        self.value.clone()
    }

    fn restore(&mut self, snapshot: Option<Value>) -> Result<()> {
        self.value = snapshot;
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.value.is_some()
    }

    fn fresh(&self) -> Box<dyn Channel> {
        Box::new(Self {
            value: None,
            reducer: Arc::clone(&self.reducer),
        })
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}
