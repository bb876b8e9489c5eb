// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Reconnect policy for backend connections.
//!
//! The driver runtime owns reconnection. After a failed connect it asks its
//! [`RetryStrategy`] whether and when to try again; after a dropped
//! connection it waits the first backoff step. `max_attempts = 0` never
//! gives up, which is the default.
//!
//! ```
//! use tagway_core::retry::{ExponentialBackoff, RetryConfig};
//! use std::time::Duration;
//!
//! let backoff = ExponentialBackoff::new(
//!     RetryConfig::default()
//!         .with_initial_delay(Duration::from_millis(100))
//!         .with_max_delay(Duration::from_secs(1)),
//! );
//! assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay_for(20), Duration::from_secs(1));
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DriverError;

// =============================================================================
// RetryConfig
// =============================================================================

/// Reconnect settings, as found under `reconnect` in the gateway file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Connect attempts before giving up (0 = unlimited).
    #[serde(default)]
    pub max_attempts: u32,

    /// Delay before the second attempt.
    #[serde(default = "default_initial_delay")]
    #[serde(with = "duration_millis", rename = "initial_delay_ms")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    #[serde(default = "default_max_delay")]
    #[serde(with = "duration_millis", rename = "max_delay_ms")]
    pub max_delay: Duration,

    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0).
    #[serde(default)]
    pub jitter: f64,
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    /// Sets the attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter factor, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Returns `true` once `attempt` has used up the budget.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// =============================================================================
// RetryStrategy
// =============================================================================

/// Outcome of a failed connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the delay.
    Retry(Duration),
    /// Stop trying.
    DoNotRetry,
}

/// Decides what follows a failed connect.
pub trait RetryStrategy: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &str;

    /// `attempt` is 1-based and counts the attempt that just failed.
    fn should_retry(&self, error: &DriverError, attempt: u32) -> RetryDecision;
}

// =============================================================================
// ExponentialBackoff
// =============================================================================

/// `min(initial_delay * multiplier^(attempt-1), max_delay)`, with optional
/// jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Creates a backoff from `config`.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns the delay after attempt `attempt`, without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay.as_millis() as f64;
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let grown = base * self.config.multiplier.powi(exponent);
        let capped = grown.min(self.config.max_delay.as_millis() as f64);

        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Returns the jittered delay after attempt `attempt`, never above
    /// `max_delay`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        apply_jitter(self.delay_for(attempt), self.config.jitter).min(self.config.max_delay)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn name(&self) -> &str {
        "exponential_backoff"
    }

    fn should_retry(&self, error: &DriverError, attempt: u32) -> RetryDecision {
        if self.config.exhausted(attempt) || !error.is_retryable() {
            return RetryDecision::DoNotRetry;
        }
        RetryDecision::Retry(self.next_delay(attempt))
    }
}

// =============================================================================
// Jitter
// =============================================================================

fn apply_jitter(duration: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return duration;
    }

    let millis = duration.as_millis() as f64;
    let spread = millis * factor;
    let unit = (xorshift() as f64 / u32::MAX as f64) * 2.0 - 1.0;

    Duration::from_millis((millis + unit * spread).max(0.0) as u64)
}

/// Clock-seeded xorshift. Only spreads reconnects apart.
fn xorshift() -> u32 {
    use std::time::SystemTime;

    static STATE: AtomicU32 = AtomicU32::new(0);

    let mut x = STATE.load(Ordering::Relaxed);
    if x == 0 {
        x = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x2545_F491)
            | 1;
    }
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    STATE.store(x, Ordering::Relaxed);
    x
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(initial_ms: u64, max_ms: u64) -> ExponentialBackoff {
        ExponentialBackoff::new(
            RetryConfig::default()
                .with_initial_delay(Duration::from_millis(initial_ms))
                .with_max_delay(Duration::from_millis(max_ms)),
        )
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let backoff = backoff(100, 750);

        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(750));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_millis(750));
    }

    #[test]
    fn test_jitter_stays_below_cap() {
        let backoff = ExponentialBackoff::new(backoff(100, 200).config().clone().with_jitter(1.0));
        for attempt in 1..50 {
            assert!(backoff.next_delay(attempt) <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_unlimited_by_default() {
        let backoff = ExponentialBackoff::default();
        let error = DriverError::connection_failed("refused");
        assert!(matches!(backoff.should_retry(&error, 10_000), RetryDecision::Retry(_)));
    }

    #[test]
    fn test_budget_and_fatal_errors_stop_retries() {
        let limited = ExponentialBackoff::new(RetryConfig::default().with_max_attempts(3));
        let refused = DriverError::connection_failed("refused");
        assert!(matches!(limited.should_retry(&refused, 2), RetryDecision::Retry(_)));
        assert_eq!(limited.should_retry(&refused, 3), RetryDecision::DoNotRetry);

        let fatal = DriverError::unsupported("connect");
        assert_eq!(
            ExponentialBackoff::default().should_retry(&fatal, 1),
            RetryDecision::DoNotRetry
        );
    }

    #[test]
    fn test_config_serde_uses_millis() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"initial_delay_ms": 250, "max_delay_ms": 1000}"#).unwrap();
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(1));
        assert_eq!(config.max_attempts, 0);
    }
}
