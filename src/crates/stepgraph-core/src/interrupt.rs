//! Interrupt points
//!
//! A run pauses before or after a node either because the run configuration
//! lists the node, or because the node itself asked for it on an earlier
//! execution. Node requests are one-shot: they fire the next time the node is
//! scheduled and are then cleared.

use serde::{Deserialize, Serialize};
use std::fmt;

/// When an interrupt fires relative to a node's execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptWhen {
    Before,
    After,
}

impl fmt::Display for InterruptWhen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptWhen::Before => write!(f, "before"),
            InterruptWhen::After => write!(f, "after"),
        }
    }
}

impl std::str::FromStr for InterruptWhen {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "before" => Ok(InterruptWhen::Before),
            "after" => Ok(InterruptWhen::After),
            _ => Err(format!("Invalid interrupt point: {}", s)),
        }
    }
}
