//! Bounded exponential backoff for transient provisioning errors.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::backend::ProvisionError;
use crate::graph::UnitId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryPolicyError {
  #[error("retry.max_attempts must be at least 1")]
  NoAttempts,

  #[error("retry.backoff_multiplier must be a finite number >= 1.0, got {0}")]
  BackoffMultiplier(f64),
}

/// Retry configuration for backend operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub max_attempts: u32,

  #[serde(with = "millis")]
  pub initial_delay: Duration,

  #[serde(with = "millis")]
  pub max_delay: Duration,

  pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
      backoff_multiplier: 2.0,
    }
  }
}

impl RetryPolicy {
  /// A policy that retries without waiting.
  pub fn immediate(max_attempts: u32) -> Self {
    Self {
      max_attempts,
      initial_delay: Duration::ZERO,
      max_delay: Duration::ZERO,
      backoff_multiplier: 1.0,
    }
  }

  /// Check the values a settings file can get wrong.
  pub fn validate(&self) -> Result<(), RetryPolicyError> {
    if self.max_attempts == 0 {
      return Err(RetryPolicyError::NoAttempts);
    }
    if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
      return Err(RetryPolicyError::BackoffMultiplier(self.backoff_multiplier));
    }
    Ok(())
  }

  /// Delay before the attempt following `attempt` (1-based), capped at
  /// `max_delay`.
  ///
  /// A multiplier that fails [`RetryPolicy::validate`] is treated as 1.0.
  pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
    let multiplier = if self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0 {
      self.backoff_multiplier
    } else {
      1.0
    };
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let delay = self.initial_delay.as_secs_f64() * multiplier.powi(exponent);
    let cap = self.max_delay.as_secs_f64();
    Duration::from_secs_f64(if delay.is_finite() { delay.min(cap) } else { cap })
  }

  /// Run `operation` until it succeeds, fails permanently, or attempts run out.
  ///
  /// Returns the final result together with the number of attempts made.
  pub async fn run<T, F, Fut>(&self, unit: &UnitId, mut operation: F) -> (Result<T, ProvisionError>, u32)
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProvisionError>>,
  {
    let max_attempts = self.max_attempts.max(1);
    let mut attempt = 1;
    loop {
      match operation().await {
        Err(e) if e.is_transient() && attempt < max_attempts => {
          let delay = self.delay_for_attempt(attempt);
          warn!(
            unit = %unit,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "transient failure, retrying"
          );
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        result => return (result, attempt),
      }
    }
  }
}

mod millis {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
  }
}
