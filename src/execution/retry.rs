//! Retry Policy
//!
//! Exponential backoff with jitter for failed step attempts.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::workflow::Configuration;

/// Backoff settings for step retries.
///
/// The delay before retry `n` (1-based) is
/// `base_delay * multiplier^(n-1)`, capped at `max_delay`, then spread by
/// `±jitter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay used as random spread (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Takes retry count and base delay from a definition's configuration,
    /// keeping the remaining knobs from `self`.
    pub fn for_configuration(&self, configuration: &Configuration) -> Self {
        Self {
            max_retries: configuration.max_retries,
            base_delay: configuration.retry_base_delay(),
            ..self.clone()
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Returns true if a step that has already retried `retry_count` times
    /// may be attempted again.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = (retry - 1).min(32) as i32;
        let delay = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before retry number `retry` (1-based), with jitter applied.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay_for(retry);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }

        let spread = base.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
