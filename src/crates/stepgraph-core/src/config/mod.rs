//! Run configuration
//!
//! [`RunConfig`] carries everything that shapes a single run: how many
//! supersteps it may take, how many tasks run at once, where it pauses, how
//! long a superstep may take and how failing tasks are retried.
//!
//! Configuration can be assembled three ways:
//!
//! ```rust
//! use stepgraph_core::{RunConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! // Builder
//! let config = RunConfig::new()
//!     .with_recursion_limit(50)
//!     .with_concurrency_limit(4)
//!     .with_interrupt_before(["review"])
//!     .with_step_timeout(Duration::from_secs(30))
//!     .with_retry_policy(RetryPolicy::new(2));
//! assert!(config.validate().is_ok());
//!
//! // YAML
//! let config = RunConfig::from_yaml_str("recursion_limit: 10\ninterrupt_after: [draft]\n").unwrap();
//! assert_eq!(config.recursion_limit(), 10);
//! ```
//!
//! or from `STEPGRAPH_*` environment variables with [`RunConfig::from_env`].

pub mod env;

use crate::error::{GraphError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Default prefix for environment variables
pub const ENV_PREFIX: &str = "STEPGRAPH";

/// Default maximum number of supersteps per run
pub const DEFAULT_RECURSION_LIMIT: u64 = 25;

/// Default wait for in-flight tasks after cancellation
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 5_000;

/// Configuration of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum number of supersteps before the run fails; `None` means
    /// [`DEFAULT_RECURSION_LIMIT`]
    pub recursion_limit: Option<u64>,

    /// Maximum number of tasks executing at once; `None` means one per core
    pub concurrency_limit: Option<usize>,

    /// Nodes to pause before
    pub interrupt_before: BTreeSet<String>,

    /// Nodes to pause after
    pub interrupt_after: BTreeSet<String>,

    /// Wall-clock limit for one superstep
    pub step_timeout_ms: Option<u64>,

    /// Retry policy for nodes without their own; `None` means
    /// [`RetryPolicy::default`]
    pub retry_policy: Option<RetryPolicy>,

    /// How long in-flight tasks may keep running after cancellation; `None`
    /// means [`DEFAULT_CANCEL_GRACE_MS`]
    pub cancel_grace_ms: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            recursion_limit: None,
            concurrency_limit: None,
            interrupt_before: BTreeSet::new(),
            interrupt_after: BTreeSet::new(),
            step_timeout_ms: None,
            retry_policy: None,
            cancel_grace_ms: None,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recursion_limit(mut self, limit: u64) -> Self {
        self.recursion_limit = Some(limit);
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn with_interrupt_before<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interrupt_before.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn with_interrupt_after<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interrupt_after.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = Some(u64::try_from(grace.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn recursion_limit(&self) -> u64 {
        self.recursion_limit.unwrap_or(DEFAULT_RECURSION_LIMIT)
    }

    /// Retry policy for nodes without their own, with the default applied
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone().unwrap_or_default()
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_ms.map(Duration::from_millis)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms.unwrap_or(DEFAULT_CANCEL_GRACE_MS))
    }

    /// Concurrency limit with the per-core default applied
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency_limit.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.recursion_limit == Some(0) {
            return Err(GraphError::Configuration("recursion_limit must be at least 1".to_string()));
        }
        if self.concurrency_limit == Some(0) {
            return Err(GraphError::Configuration("concurrency_limit must be at least 1".to_string()));
        }
        if self.step_timeout_ms == Some(0) {
            return Err(GraphError::Configuration("step_timeout_ms must be greater than 0".to_string()));
        }
        match &self.retry_policy {
            Some(policy) => policy.validate().map_err(GraphError::Configuration),
            None => Ok(()),
        }
    }

    /// Load from environment variables named `<PREFIX>_<SETTING>`
    ///
    /// Recognized settings: `RECURSION_LIMIT`, `CONCURRENCY_LIMIT`,
    /// `INTERRUPT_BEFORE`, `INTERRUPT_AFTER` (comma separated),
    /// `STEP_TIMEOUT_MS`, `CANCEL_GRACE_MS`, `MAX_ATTEMPTS`,
    /// `RETRY_INITIAL_INTERVAL`, `RETRY_JITTER`. Unset variables keep
    /// their defaults.
    pub fn from_env(prefix: &str) -> Result<Self> {
        let key = |name: &str| env::build_env_key(prefix, name);
        let mut config = Self::default();

        if let Some(limit) = env::get_env_parse(&key("recursion_limit"))? {
            config.recursion_limit = Some(limit);
        }
        if let Some(limit) = env::get_env_parse(&key("concurrency_limit"))? {
            config.concurrency_limit = Some(limit);
        }
        if let Some(nodes) = env::get_env_set(&key("interrupt_before"))? {
            config.interrupt_before = nodes;
        }
        if let Some(nodes) = env::get_env_set(&key("interrupt_after"))? {
            config.interrupt_after = nodes;
        }
        if let Some(ms) = env::get_env_parse(&key("step_timeout_ms"))? {
            config.step_timeout_ms = Some(ms);
        }
        if let Some(ms) = env::get_env_parse(&key("cancel_grace_ms"))? {
            config.cancel_grace_ms = Some(ms);
        }
        if let Some(attempts) = env::get_env_parse(&key("max_attempts"))? {
            config.retry_policy.get_or_insert_with(RetryPolicy::default).max_attempts = attempts;
        }
        if let Some(seconds) = env::get_env_parse(&key("retry_initial_interval"))? {
            config.retry_policy.get_or_insert_with(RetryPolicy::default).initial_interval = seconds;
        }
        if let Some(jitter) = env::get_env_bool(&key("retry_jitter"))? {
            config.retry_policy.get_or_insert_with(RetryPolicy::default).jitter = jitter;
        }

        config.validate()?;
        Ok(config)
    }

    /// [`RunConfig::from_env`] with the `STEPGRAPH` prefix
    pub fn from_default_env() -> Result<Self> {
        Self::from_env(ENV_PREFIX)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Fill unset settings of `self` from `other`
    ///
    /// Collections are unioned. A scalar setting of `self` wins whenever it
    /// was set, even to its default value.
    pub fn merge(mut self, other: RunConfig) -> Self {
        self.recursion_limit = self.recursion_limit.or(other.recursion_limit);
        self.concurrency_limit = self.concurrency_limit.or(other.concurrency_limit);
        self.step_timeout_ms = self.step_timeout_ms.or(other.step_timeout_ms);
        self.retry_policy = self.retry_policy.or(other.retry_policy);
        self.cancel_grace_ms = self.cancel_grace_ms.or(other.cancel_grace_ms);
        self.interrupt_before.extend(other.interrupt_before);
        self.interrupt_after.extend(other.interrupt_after);
        self
    }
}
