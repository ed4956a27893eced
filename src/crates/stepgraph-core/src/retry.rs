//! Retry policy for node execution
//!
//! Every task in a superstep retries independently. Delays grow
//! exponentially from `initial_interval`, are capped at `max_interval`, and
//! are optionally spread with jitter so that tasks failing together do not
//! retry in lockstep.
//!
//! ```rust
//! use stepgraph_core::RetryPolicy;
//!
//! let policy = RetryPolicy::new(4)
//!     .with_initial_interval(0.1)
//!     .with_backoff_factor(2.0)
//!     .with_jitter(false);
//!
//! assert!(policy.should_retry(1));
//! assert!(!policy.should_retry(4));
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: usize,

    /// Delay before the first retry, in seconds
    pub initial_interval: f64,

    /// Multiplier applied to the delay after each retry
    pub backoff_factor: f64,

    /// Upper bound for any single delay, in seconds
    pub max_interval: f64,

    /// Scale each delay by a random factor in `[0.5, 1.5]`
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            jitter: true,
        }
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the given number of failed attempts (0-based retry index)
    pub fn calculate_delay(&self, retry: usize) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base_delay = self.initial_interval * self.backoff_factor.powi(exponent);
        let capped_delay = base_delay.min(self.max_interval).max(0.0);

        let final_delay = if self.jitter {
            let mut rng = rand::thread_rng();
            capped_delay * rng.gen_range(0.5..=1.5)
        } else {
            capped_delay
        };

        // Finite intervals can still exceed what a Duration holds
        Duration::try_from_secs_f64(final_delay).unwrap_or(Duration::MAX)
    }

    /// Whether another attempt is allowed after `attempts` attempts have been made
    pub fn should_retry(&self, attempts: usize) -> bool {
        attempts < self.max_attempts
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry_policy.max_attempts must be at least 1".to_string());
        }
        if !self.initial_interval.is_finite() || self.initial_interval < 0.0 {
            return Err("retry_policy.initial_interval must be a non-negative number".to_string());
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err("retry_policy.backoff_factor must be at least 1.0".to_string());
        }
        if !self.max_interval.is_finite() || self.max_interval < 0.0 {
            return Err("retry_policy.max_interval must be a non-negative number".to_string());
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
