use crate::domain::command::{Command, CommandBox};
use crate::domain::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A queued command plus its queue-level retry bookkeeping.
pub struct Envelope {
    command: CommandBox,
    retry_policy: RetryPolicy,
    attempts: u32,
    errors: Vec<String>,
}

impl Envelope {
    pub fn new(command: impl Command + 'static, retry_policy: RetryPolicy) -> Self {
        Self::from_boxed(Box::new(command), retry_policy)
    }

    pub fn from_boxed(command: CommandBox, retry_policy: RetryPolicy) -> Self {
        Self {
            command,
            retry_policy,
            attempts: 0,
            errors: Vec::new(),
        }
    }

    pub fn description(&self) -> &str {
        self.command.description()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.errors.last().map(String::as_str)
    }

    /// Every recorded failure, oldest first.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn command_mut(&mut self) -> &mut CommandBox {
        &mut self.command
    }

    /// Counts a failed attempt and remembers its error.
    pub fn record_failure(&mut self, error: impl fmt::Display) {
        self.attempts += 1;
        self.errors.push(error.to_string());
    }

    /// Whether the retry budget still allows another attempt.
    pub fn can_retry(&self) -> bool {
        self.retry_policy.allows_retry_after(self.attempts)
    }

    /// Clears the attempt counter so the envelope gets a fresh budget and
    /// returns the previous count. The error history is kept.
    pub fn reset_attempts(&mut self) -> u32 {
        std::mem::take(&mut self.attempts)
    }

    pub(crate) fn restore_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("command", &self.description())
            .field("retry_policy", &self.retry_policy)
            .field("attempts", &self.attempts)
            .field("last_error", &self.last_error())
            .finish()
    }
}

/// Read-only snapshot of a dead-lettered envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub command: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub errors: Vec<String>,
}

impl From<&Envelope> for DeadLetterRecord {
    fn from(envelope: &Envelope) -> Self {
        Self {
            command: envelope.description().to_string(),
            attempts: envelope.attempts,
            last_error: envelope.last_error().map(str::to_string),
            errors: envelope.errors.clone(),
        }
    }
}
