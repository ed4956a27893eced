//! Dependency index: which nodes wake up when a channel changes

use std::collections::{BTreeSet, HashMap};

/// Mapping from channel name to the nodes it triggers
///
/// Built once when the graph is compiled. Lookups cost one hash probe per
/// updated channel, so planning a superstep never scans every node.
#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    trigger_to_nodes: HashMap<String, BTreeSet<String>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(node, trigger channels)` pairs
    pub fn from_triggers<'a, I, T>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, T)>,
        T: IntoIterator<Item = &'a str>,
    {
        let mut index = Self::new();
        for (node, triggers) in nodes {
            for channel in triggers {
                index.register(channel, node);
            }
        }
        index
    }

    /// Register `node` as triggered by `channel`
    pub fn register(&mut self, channel: impl Into<String>, node: impl Into<String>) {
        self.trigger_to_nodes
            .entry(channel.into())
            .or_default()
            .insert(node.into());
    }

    /// Nodes triggered by any of the updated channels, in name order
    pub fn nodes_triggered_by<'a, I>(&self, updated_channels: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut nodes = BTreeSet::new();
        for channel in updated_channels {
            if let Some(triggered) = self.trigger_to_nodes.get(channel) {
                nodes.extend(triggered.iter().cloned());
            }
        }
        nodes
    }

    /// Nodes triggered by a single channel
    pub fn nodes_for(&self, channel: &str) -> Option<&BTreeSet<String>> {
        self.trigger_to_nodes.get(channel)
    }

    pub fn trigger_to_nodes(&self) -> &HashMap<String, BTreeSet<String>> {
        &self.trigger_to_nodes
    }

    /// Number of channels that trigger at least one node
    pub fn len(&self) -> usize {
        self.trigger_to_nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trigger_to_nodes.is_empty()
    }
}
