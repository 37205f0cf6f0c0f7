// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Retry scheduling with capped exponential backoff.
//!
//! The delay after the n-th failed attempt is `base * 2^n` plus up to
//! `jitter * base * 2^n` of random spread, capped at `max_delay`. Because
//! jitter stays below the exponential step, uncapped delays strictly increase
//! from one attempt to the next.

use std::time::Duration;

use rand::Rng;

/// How failed operations are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts (including the first) before an operation is dead-lettered.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Random spread as a fraction of the exponential term, in `[0, 1)`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Returns true once `attempts` failures exhaust the policy.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Backoff after `attempts` failures, with a fresh random jitter sample.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let sample = if self.jitter > 0.0 {
            rand::rng().random_range(0.0..self.jitter)
        } else {
            0.0
        };
        self.delay_with_jitter(attempts, sample)
    }

    /// Backoff after `attempts` failures for a given jitter fraction.
    pub fn delay_with_jitter(&self, attempts: u32, jitter_fraction: f64) -> Duration {
        let exponent = attempts.min(32);
        let base_ms = self.base_delay.as_millis() as f64;
        let exponential = base_ms * 2f64.powi(exponent as i32);
        let spread = exponential * jitter_fraction.clamp(0.0, 1.0);
        let max_ms = self.max_delay.as_millis() as f64;

        // CORRECTNESS: value is clamped to max_ms, which came from a u128 millis count
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay_ms = (exponential + spread).min(max_ms) as u64;
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
