//! Per-run state owned by the superstep loop

use crate::error::{GraphError, Result};
use crate::stream::RunStatus;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use stepgraph_checkpoint::{Channel, Checkpoint};

/// The channels of one run
///
/// Each run owns its own set, created from the compiled graph's prototypes.
#[derive(Debug, Clone)]
pub struct ChannelSet {
    channels: BTreeMap<String, Box<dyn Channel>>,
}

impl ChannelSet {
    /// Empty channels of the same kinds as `prototypes`
    pub fn fresh(prototypes: &BTreeMap<String, Box<dyn Channel>>) -> Self {
        Self {
            channels: prototypes
                .iter()
                .map(|(name, channel)| (name.clone(), channel.fresh()))
                .collect(),
        }
    }

    /// Fresh channels restored from a checkpoint
    ///
    /// # Errors
    ///
    /// [`GraphError::CheckpointCorruption`] when the checkpoint holds values for
    /// unknown channels or a value a channel cannot restore.
    pub fn restore(prototypes: &BTreeMap<String, Box<dyn Channel>>, checkpoint: &Checkpoint) -> Result<Self> {
        if let Some(unknown) = checkpoint
            .channel_values
            .keys()
            .find(|name| !prototypes.contains_key(*name))
        {
            return Err(GraphError::corruption(
                &checkpoint.id,
                format!("value for unknown channel '{unknown}'"),
            ));
        }

        let mut set = Self::fresh(prototypes);
        for (name, channel) in set.channels.iter_mut() {
            channel
                .restore(checkpoint.channel_values.get(name).cloned())
                .map_err(|e| GraphError::corruption(&checkpoint.id, format!("channel '{name}': {e}")))?;
        }
        Ok(set)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        let channel = self
            .channels
            .get(name)
            .ok_or_else(|| GraphError::MalformedGraph(format!("unknown channel '{name}'")))?;
        channel.get().map_err(|e| {
            if e.is_empty_channel() {
                GraphError::EmptyChannel(name.to_string())
            } else {
                e.into()
            }
        })
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.channels.get(name).is_some_and(|c| c.is_available())
    }

    /// Consume a channel after a subscribed task ran
    pub fn consume(&mut self, name: &str) -> bool {
        self.channels.get_mut(name).is_some_and(|c| c.consume())
    }

    /// Apply one batch of values to a channel
    pub fn update(&mut self, name: &str, values: Vec<Value>) -> Result<bool> {
        let channel = self
            .channels
            .get_mut(name)
            .ok_or_else(|| GraphError::MalformedGraph(format!("unknown channel '{name}'")))?;
        Ok(channel.update(values)?)
    }

    /// Checkpointable values of every non-empty channel
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.channels
            .iter()
            .filter_map(|(name, channel)| channel.checkpoint().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Readable value of every channel, defaults included
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.channels
            .iter()
            .filter_map(|(name, channel)| channel.get().ok().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Write the initial input of a run, returning the channels that changed
    pub fn apply_input(&mut self, input: BTreeMap<String, Value>) -> Result<BTreeSet<String>> {
        let mut updated = BTreeSet::new();
        for (name, value) in input {
            if !self.contains(&name) {
                return Err(GraphError::InvalidWrite {
                    node: "__input__".to_string(),
                    channel: name,
                });
            }
            if self.update(&name, vec![value])? {
                updated.insert(name);
            }
        }
        Ok(updated)
    }
}

/// Everything a run owns: its channels, its latest checkpoint and its status
#[derive(Debug)]
pub struct GraphState {
    pub channels: ChannelSet,
    /// Latest persisted checkpoint
    pub checkpoint: Checkpoint,
    pub status: RunStatus,
}

impl GraphState {
    pub fn new(channels: ChannelSet, checkpoint: Checkpoint) -> Self {
        Self {
            channels,
            checkpoint,
            status: RunStatus::Pending,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.checkpoint.run_id
    }

    pub fn step(&self) -> u64 {
        self.checkpoint.step
    }
}
