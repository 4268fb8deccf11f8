// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Declarative retry policy for activity calls.
//!
//! Attempt `n` (1-based) that fails with a retryable kind is followed by a wait of
//! `min(initial_interval * backoff_coefficient^(n-1), maximum_interval)`. A kind
//! listed in `non_retryable_error_kinds` stops immediately, whatever the attempt.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdkError};

/// Retry configuration applied by the activity proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Wait before the second attempt, in milliseconds.
    pub initial_interval_ms: u64,
    /// Multiplier applied to the wait after every failed attempt.
    pub backoff_coefficient: f64,
    /// Upper bound for any single wait, in milliseconds.
    pub maximum_interval_ms: u64,
    /// Total number of attempts, including the first. `0` means unlimited.
    pub maximum_attempts: u32,
    /// Failure kinds that abort without another attempt.
    #[serde(default)]
    pub non_retryable_error_kinds: Vec<String>,
}

/// What the proxy should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then try again.
    RetryAfter(Duration),
    /// The failure kind is classified non-retryable.
    NonRetryable,
    /// `maximum_attempts` has been reached.
    Exhausted,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1_000,
            backoff_coefficient: 2.0,
            maximum_interval_ms: 100_000,
            maximum_attempts: 0,
            non_retryable_error_kinds: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            maximum_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the first backoff interval.
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval_ms = duration_ms(interval);
        self
    }

    /// Set the backoff multiplier.
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the backoff cap.
    pub fn with_maximum_interval(mut self, interval: Duration) -> Self {
        self.maximum_interval_ms = duration_ms(interval);
        self
    }

    /// Set the total number of attempts (`0` = unlimited).
    pub fn with_maximum_attempts(mut self, attempts: u32) -> Self {
        self.maximum_attempts = attempts;
        self
    }

    /// Add a failure kind that must not be retried.
    pub fn with_non_retryable(mut self, kind: impl Into<String>) -> Self {
        self.non_retryable_error_kinds.push(kind.into());
        self
    }

    /// Check the policy for values the backoff formula cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_coefficient.is_finite() || self.backoff_coefficient < 1.0 {
            return Err(SdkError::Config(format!(
                "backoff_coefficient must be >= 1.0, got {}",
                self.backoff_coefficient
            )));
        }
        if self.maximum_interval_ms < self.initial_interval_ms {
            return Err(SdkError::Config(format!(
                "maximum_interval_ms ({}) is below initial_interval_ms ({})",
                self.maximum_interval_ms, self.initial_interval_ms
            )));
        }
        Ok(())
    }

    /// Wait after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_interval_ms as f64 * self.backoff_coefficient.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.maximum_interval_ms as f64).max(0.0)
        } else {
            self.maximum_interval_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    /// Whether a failure of this kind may be retried at all.
    pub fn is_retryable(&self, kind: &str) -> bool {
        !self.non_retryable_error_kinds.iter().any(|k| k == kind)
    }

    /// Whether another attempt is allowed after `attempt` attempts have been made.
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        self.maximum_attempts == 0 || attempt < self.maximum_attempts
    }

    /// Decide what follows failed attempt number `attempt` with the given kind.
    pub fn decide(&self, attempt: u32, kind: &str) -> RetryDecision {
        if !self.is_retryable(kind) {
            RetryDecision::NonRetryable
        } else if !self.has_attempts_left(attempt) {
            RetryDecision::Exhausted
        } else {
            RetryDecision::RetryAfter(self.delay_for_attempt(attempt))
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_initial_interval(Duration::from_secs(1))
            .with_backoff_coefficient(2.0)
            .with_maximum_interval(Duration::from_secs(30))
            .with_maximum_attempts(5)
            .with_non_retryable("NotFound")
            .with_non_retryable("ValidationError")
    }

    #[test]
    fn test_delay_grows_geometrically_until_cap() {
        let p = policy();
        let delays: Vec<u64> = (1..=7).map(|a| p.delay_for_attempt(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn test_delay_survives_huge_attempt_numbers() {
        let p = policy();
        assert_eq!(p.delay_for_attempt(u32::MAX), Duration::from_secs(30));
        assert_eq!(p.delay_for_attempt(0), Duration::from_secs(1));
    }

    #[test]
    fn test_fractional_coefficient() {
        let p = RetryPolicy::default()
            .with_initial_interval(Duration::from_millis(100))
            .with_backoff_coefficient(1.5)
            .with_maximum_interval(Duration::from_secs(10));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(225));
    }

    #[test]
    fn test_decide() {
        let p = policy();
        assert_eq!(p.decide(1, "NotFound"), RetryDecision::NonRetryable);
        assert_eq!(p.decide(4, "ValidationError"), RetryDecision::NonRetryable);
        assert_eq!(
            p.decide(1, "Transient"),
            RetryDecision::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(
            p.decide(4, "Transient"),
            RetryDecision::RetryAfter(Duration::from_secs(8))
        );
        assert_eq!(p.decide(5, "Transient"), RetryDecision::Exhausted);
    }

    #[test]
    fn test_unlimited_attempts() {
        let p = policy().with_maximum_attempts(0);
        assert!(p.has_attempts_left(10_000));
        assert!(matches!(p.decide(10_000, "Timeout"), RetryDecision::RetryAfter(_)));
    }

    #[test]
    fn test_no_retry() {
        let p = RetryPolicy::no_retry();
        assert_eq!(p.decide(1, "Transient"), RetryDecision::Exhausted);
    }

    #[test]
    fn test_validate() {
        assert!(policy().validate().is_ok());
        assert!(policy().with_backoff_coefficient(0.5).validate().is_err());
        assert!(policy().with_backoff_coefficient(f64::NAN).validate().is_err());
        assert!(
            policy()
                .with_maximum_interval(Duration::from_millis(10))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_serde_uses_camel_case() {
        let json = serde_json::to_value(policy()).unwrap();
        assert_eq!(json["initialIntervalMs"], 1_000);
        assert_eq!(json["maximumAttempts"], 5);
        assert_eq!(json["nonRetryableErrorKinds"][0], "NotFound");

        let back: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy());
    }
}
