//! Runtime settings for the ledger engine and the queued dispatcher.
//!
//! The binary fills these from command-line flags; library users build them
//! directly or start from `Default`.

use crate::domain::retry::{BackoffMode, RetryPolicy};
use crate::receivers::email::DEFAULT_MAX_SUBJECT_LEN;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_STEPS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Applied to envelopes that do not carry their own policy.
    pub default_policy: RetryPolicy,
    /// Upper bound on envelopes processed by one drain.
    pub max_steps: usize,
    pub backoff: BackoffMode,
    pub max_subject_len: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_policy: RetryPolicy::new(DEFAULT_MAX_RETRIES, DEFAULT_BACKOFF),
            max_steps: DEFAULT_MAX_STEPS,
            backoff: BackoffMode::default(),
            max_subject_len: DEFAULT_MAX_SUBJECT_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Retry policy wrapped around every ledger operation.
    pub policy: RetryPolicy,
    pub backoff: BackoffMode,
}
