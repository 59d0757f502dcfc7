//! Election engine configuration.
//!
//! Timing knobs for event batching and round supervision, plus the cap on
//! how many pending transactions a single event may carry.

use serde::{Deserialize, Serialize};

/// Configuration for the election engine.
///
/// All durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// How often pending transactions are batched into an event.
    /// Default: 100.
    pub batch_interval_ms: u64,

    /// How long a round may collect votes (or readiness) before it is
    /// abandoned and re-queued.
    /// Default: 5000.
    pub round_timeout_ms: u64,

    /// Upper bound on the number of transactions packed into one event.
    /// Whatever does not fit stays pending for the next batch.
    /// Default: 10000.
    pub max_transactions_per_event: usize,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            batch_interval_ms: 100,
            round_timeout_ms: 5000,
            max_transactions_per_event: 10_000,
        }
    }
}

impl ElectionConfig {
    /// Short timings for local shards and tests.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            batch_interval_ms: 20,
            round_timeout_ms: 2_000,
            max_transactions_per_event: 1_000,
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_interval_ms == 0 {
            return Err(ConfigError::InvalidBatchInterval);
        }
        if self.round_timeout_ms <= self.batch_interval_ms {
            return Err(ConfigError::RoundTimeoutTooShort {
                round_timeout_ms: self.round_timeout_ms,
                batch_interval_ms: self.batch_interval_ms,
            });
        }
        if self.max_transactions_per_event == 0 {
            return Err(ConfigError::InvalidEventCapacity);
        }
        Ok(())
    }
}

/// Errors in election configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("batch_interval_ms must be > 0")]
    InvalidBatchInterval,
    #[error(
        "round_timeout_ms ({round_timeout_ms}) must exceed batch_interval_ms ({batch_interval_ms})"
    )]
    RoundTimeoutTooShort {
        round_timeout_ms: u64,
        batch_interval_ms: u64,
    },
    #[error("max_transactions_per_event must be > 0")]
    InvalidEventCapacity,
}
