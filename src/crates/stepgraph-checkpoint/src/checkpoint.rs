//! Checkpoint data structures
//!
//! A [`Checkpoint`] is an immutable snapshot of one run taken at a superstep
//! boundary. The superstep loop creates one after the initial input is applied
//! and one after every successful superstep; stores persist them and hand them
//! back on resume.
//!
//! ```text
//! run "order-42"
//!
//!  step 0 (Input)      step 1 (Loop)        step 2 (Loop)
//! ┌──────────────┐    ┌──────────────┐     ┌──────────────┐
//! │ x: 1         │───▶│ x: 1         │────▶│ x: 1         │
//! │              │    │ y: 2         │     │ y: 2         │
//! │ updated: {x} │    │ updated: {y} │     │ result: 4    │
//! │ sends: []    │    │ sends: [..]  │     │ updated: {..}│
//! └──────────────┘    └──────────────┘     └──────────────┘
//!        ▲ parent_id         ▲ parent_id
//! ```
//!
//! Only channels that hold a value appear in `channel_values`; an absent key
//! means the channel was empty at that boundary.

use crate::error::{CheckpointError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Identifier of a stored checkpoint
pub type CheckpointId = String;

/// Format version written into every checkpoint
pub const CURRENT_VERSION: u32 = 1;

/// How a checkpoint came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Initial input written before the first superstep
    Input,
    /// Written after a superstep completed
    Loop,
    /// Written after a superstep of a resumed run completed
    Resume,
}

/// Additional information stored alongside a checkpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// Nodes executed in the superstep that produced this checkpoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A message to a node, queued for the next superstep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSend {
    pub node: String,
    pub payload: Value,
}

impl PendingSend {
    pub fn new(node: impl Into<String>, payload: Value) -> Self {
        Self {
            node: node.into(),
            payload,
        }
    }
}

/// A write produced by a task but not applied to any channel
///
/// Stores record these against the checkpoint the task was planned from when
/// a superstep fails part way, so a later attempt can reuse them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub task_id: String,
    pub channel: String,
    pub value: Value,
}

impl PendingWrite {
    pub fn new(task_id: impl Into<String>, channel: impl Into<String>, value: Value) -> Self {
        Self {
            task_id: task_id.into(),
            channel: channel.into(),
            value,
        }
    }
}

/// Interrupt points registered by nodes while the run was executing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptRegistrations {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub before: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub after: BTreeSet<String>,
}

impl InterruptRegistrations {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

/// Immutable snapshot of a run at a superstep boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format version
    pub v: u32,

    pub id: CheckpointId,

    pub run_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CheckpointId>,

    /// Number of supersteps completed when this snapshot was taken
    pub step: u64,

    pub ts: DateTime<Utc>,

    pub channel_values: BTreeMap<String, Value>,

    /// Channels whose value changed in the superstep that produced this checkpoint
    #[serde(default)]
    pub updated_channels: BTreeSet<String>,

    /// Sends to turn into PUSH tasks in the next superstep
    #[serde(default)]
    pub pending_sends: Vec<PendingSend>,

    #[serde(default)]
    pub interrupts: InterruptRegistrations,

    /// Set when a node asked the run to stop early
    #[serde(default)]
    pub halted: bool,

    #[serde(default)]
    pub metadata: CheckpointMetadata,

    /// Filled in by stores on load; never part of the stored snapshot itself
    #[serde(default, skip_serializing)]
    pub pending_writes: Vec<PendingWrite>,
}

impl Checkpoint {
    /// First checkpoint of a run, holding the initial channel values
    pub fn input(run_id: impl Into<String>, channel_values: BTreeMap<String, Value>) -> Self {
        let updated_channels = channel_values.keys().cloned().collect();
        Self {
            v: CURRENT_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            parent_id: None,
            step: 0,
            ts: Utc::now(),
            channel_values,
            updated_channels,
            pending_sends: Vec::new(),
            interrupts: InterruptRegistrations::default(),
            halted: false,
            metadata: CheckpointMetadata::new().with_source(CheckpointSource::Input),
            pending_writes: Vec::new(),
        }
    }

    /// Successor of this checkpoint, one superstep later
    ///
    /// Channel state is supplied by the caller; interrupt registrations carry over.
    pub fn next(&self, channel_values: BTreeMap<String, Value>, updated_channels: BTreeSet<String>) -> Self {
        Self {
            v: CURRENT_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            run_id: self.run_id.clone(),
            parent_id: Some(self.id.clone()),
            step: self.step + 1,
            ts: Utc::now(),
            channel_values,
            updated_channels,
            pending_sends: Vec::new(),
            interrupts: self.interrupts.clone(),
            halted: false,
            metadata: CheckpointMetadata::new().with_source(CheckpointSource::Loop),
            pending_writes: Vec::new(),
        }
    }

    /// Whether no superstep has run yet
    pub fn is_initial(&self) -> bool {
        self.step == 0
    }

    /// Reject snapshots written by an incompatible format version
    pub fn validate(&self) -> Result<()> {
        if self.v != CURRENT_VERSION {
            return Err(CheckpointError::corruption(
                &self.id,
                format!("unsupported format version {} (expected {CURRENT_VERSION})", self.v),
            ));
        }
        Ok(())
    }

    /// Compare the run state two checkpoints describe, ignoring ids and timestamps
    pub fn same_state(&self, other: &Checkpoint) -> bool {
        self.step == other.step
            && self.channel_values == other.channel_values
            && self.updated_channels == other.updated_channels
            && self.pending_sends == other.pending_sends
            && self.interrupts == other.interrupts
            && self.halted == other.halted
    }
}
