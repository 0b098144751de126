// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect delay schedule: exponential growth, capped, with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Retry schedule for reconnects.
///
/// `attempt` only grows between calls to [`Backoff::reset`], which the
/// session makes after an authenticated connection or an explicit disconnect.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    config: BackoffConfig,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Backoff { attempt: 0, config }
    }

    /// Retries scheduled since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// `min(base * 2^attempt, max)` in milliseconds, before jitter.
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let exponential = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(31));
        exponential.min(self.config.max_delay_ms)
    }

    /// Delay before the next retry, or `None` once `max_attempts` is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let random = rand::thread_rng().gen::<f64>();
        self.next_delay_with(random)
    }

    /// Same as [`Backoff::next_delay`] with the jitter sample supplied.
    ///
    /// `random` in `[0, 1)` maps to a factor in `[1 - jitter, 1 + jitter)`.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn next_delay_with(&mut self, random: f64) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let capped = self.base_delay_ms(self.attempt);
        let jitter = 1.0 + (random.clamp(0.0, 1.0) * 2.0 - 1.0) * self.config.jitter_factor;
        let delay_ms = ((capped as f64) * jitter)
            .round()
            .clamp(0.0, self.config.max_delay_ms as f64) as u64;
        self.attempt += 1;
        Some(Duration::from_millis(delay_ms))
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
