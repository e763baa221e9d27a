//! Guard configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds and cooldown for one guard
///
/// Fixed for the lifetime of a guard. Deserializes from a partial table,
/// e.g. `failure_threshold = 2` with the rest defaulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Consecutive failures that open the circuit (0 opens on the first failure)
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a trial call
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    /// Trial calls admitted while half-open, and successes needed to close
    pub half_open_max_calls: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

impl GuardConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }
}
