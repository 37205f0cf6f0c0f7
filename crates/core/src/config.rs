// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Engine tuning.
//!
//! Every field has a default, so an empty `[engine]` table (or none at all)
//! yields a working configuration. Durations are plain integers with their
//! unit in the field name.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conflict::Strategy;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Operations fetched per batch (default: 32).
    pub batch_size: usize,
    /// Concurrent remote requests per batch (default: 4).
    pub fan_out: usize,
    /// Upper bound on batches in one cycle (default: 16).
    pub max_batches_per_cycle: usize,
    /// Attempts before an operation is dead-lettered (default: 5).
    pub max_attempts: u32,
    /// Base retry delay in milliseconds (default: 1000).
    pub initial_backoff_ms: u64,
    /// Retry delay cap in seconds (default: 300).
    pub max_backoff_secs: u64,
    /// Random spread as a fraction of the backoff, in [0, 1) (default: 0.25).
    pub backoff_jitter: f64,
    /// Per-request timeout in seconds; a timeout is a transient failure (default: 30).
    pub request_timeout_secs: u64,
    /// Minimum spacing of online events in milliseconds (default: 2000).
    pub debounce_ms: u64,
    /// Interval of the fallback sync cycle in seconds (default: 60).
    pub safety_net_interval_secs: u64,
    /// Interval of cache sweeps and queue pruning in seconds (default: 300).
    pub sweep_interval_secs: u64,
    /// Default cache entry lifetime in seconds (default: 300).
    pub cache_ttl_secs: u64,
    /// How long completed operations and resolved conflicts are kept, in
    /// seconds (default: 86400).
    pub completed_retention_secs: u64,
    /// How long shutdown waits for in-flight requests, in seconds (default: 10).
    pub shutdown_grace_secs: u64,
    /// Conflict policy for collections without an entry in `collections`.
    pub default_merge_policy: Strategy,
    /// Per-collection conflict policies.
    pub collections: HashMap<String, Strategy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            batch_size: 32,
            fan_out: 4,
            max_batches_per_cycle: 16,
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_secs: 300,
            backoff_jitter: 0.25,
            request_timeout_secs: 30,
            debounce_ms: 2000,
            safety_net_interval_secs: 60,
            sweep_interval_secs: 300,
            cache_ttl_secs: 300,
            completed_retention_secs: 86_400,
            shutdown_grace_secs: 10,
            default_merge_policy: Strategy::FieldMerge,
            collections: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.batch_size as u64),
            ("fan_out", self.fan_out as u64),
            ("max_batches_per_cycle", self.max_batches_per_cycle as u64),
            ("max_attempts", u64::from(self.max_attempts)),
            ("request_timeout_secs", self.request_timeout_secs),
            ("safety_net_interval_secs", self.safety_net_interval_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be greater than zero")));
            }
        }
        if !(0.0..1.0).contains(&self.backoff_jitter) {
            return Err(Error::InvalidConfig(format!(
                "backoff_jitter must be in [0, 1), got {}",
                self.backoff_jitter
            )));
        }
        if Duration::from_millis(self.initial_backoff_ms) > self.max_backoff() {
            return Err(Error::InvalidConfig(
                "initial_backoff_ms must not exceed max_backoff_secs".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: self.max_backoff(),
            jitter: self.backoff_jitter,
        }
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn safety_net_interval(&self) -> Duration {
        Duration::from_secs(self.safety_net_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
