use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded-attempt configuration for re-trying a failed command.
///
/// A policy allows `1 + max_retries` attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const NONE: Self = Self {
        max_retries: 0,
        backoff: Duration::ZERO,
    };

    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Duration::ZERO,
        }
    }

    /// Total number of attempts this policy allows.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether a command that has failed `attempts` times may run again.
    pub fn allows_retry_after(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }
}

/// What executors do with a policy's backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackoffMode {
    /// Backoff is reported in logs only; the caller's scheduler decides on
    /// any delay.
    #[default]
    Informational,
    /// Executors sleep for the policy's backoff before the next attempt.
    Enforced,
}

impl BackoffMode {
    pub(crate) async fn pause(self, policy: &RetryPolicy) {
        if self == Self::Enforced && !policy.backoff.is_zero() {
            tokio::time::sleep(policy.backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_include_first_try() {
        assert_eq!(RetryPolicy::NONE.attempts(), 1);
        assert_eq!(RetryPolicy::retries(3).attempts(), 4);
        assert_eq!(RetryPolicy::retries(u32::MAX).attempts(), u32::MAX);
    }

    #[test]
    fn test_allows_retry_after() {
        let policy = RetryPolicy::retries(1);
        assert!(policy.allows_retry_after(1));
        assert!(!policy.allows_retry_after(2));
        assert!(!RetryPolicy::NONE.allows_retry_after(1));
    }

    #[test]
    fn test_backoff_mode_serialization() {
        let json = serde_json::to_string(&BackoffMode::Enforced).unwrap();
        assert_eq!(json, "\"enforced\"");
        assert_eq!(BackoffMode::default(), BackoffMode::Informational);
    }

    #[tokio::test]
    async fn test_enforced_backoff_sleeps() {
        let policy = RetryPolicy::new(1, Duration::from_millis(20));
        let start = tokio::time::Instant::now();
        BackoffMode::Enforced.pause(&policy).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_informational_backoff_does_not_sleep() {
        let policy = RetryPolicy::new(1, Duration::from_secs(60));
        let start = tokio::time::Instant::now();
        BackoffMode::Informational.pause(&policy).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
