use crate::domain::command::Command;
use crate::domain::retry::{BackoffMode, RetryPolicy};
use crate::error::{CommandError, UndoFailure};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Uniform result of a retried run. Produced instead of an error so that
/// long-running loops never abort on one failed command.
#[derive(Debug)]
pub enum Outcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: CommandError },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts } | Self::Failed { attempts, .. } => *attempts,
        }
    }

    /// The last error, when every attempt failed.
    pub fn error(&self) -> Option<&CommandError> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Failed { error, .. } => Some(error),
        }
    }

    pub fn into_result(self) -> Result<u32, CommandError> {
        match self {
            Self::Succeeded { attempts } => Ok(attempts),
            Self::Failed { error, .. } => Err(error),
        }
    }
}

/// Runs a command under a bounded retry policy.
///
/// Every attempt re-invokes `execute` on the same instance; nothing is reset
/// in between. A command whose failed `execute` leaves unsafe preconditions
/// must restore them itself.
pub struct RetryExecutor<C> {
    command: C,
    policy: RetryPolicy,
    backoff: BackoffMode,
}

impl<C: Command> RetryExecutor<C> {
    pub fn new(command: C, policy: RetryPolicy) -> Self {
        Self {
            command,
            policy,
            backoff: BackoffMode::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffMode) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn command(&self) -> &C {
        &self.command
    }

    pub fn into_inner(self) -> C {
        self.command
    }

    /// Attempts the command up to `1 + max_retries` times, stopping at the
    /// first success.
    pub async fn run(&mut self) -> Outcome {
        let total = self.policy.attempts();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.command.execute().await {
                Ok(()) => return Outcome::Succeeded { attempts },
                Err(error) if attempts < total => {
                    debug!(
                        command = %self.command.description(),
                        attempt = attempts,
                        total,
                        backoff = ?self.policy.backoff,
                        error = %error,
                        "attempt failed"
                    );
                    self.backoff.pause(&self.policy).await;
                }
                Err(error) => {
                    warn!(
                        command = %self.command.description(),
                        attempts,
                        error = %error,
                        "retries exhausted"
                    );
                    return Outcome::Failed { attempts, error };
                }
            }
        }
    }
}

#[async_trait]
impl<C: Command> Command for RetryExecutor<C> {
    fn description(&self) -> &str {
        self.command.description()
    }

    fn executed(&self) -> bool {
        self.command.executed()
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        match self.run().await {
            Outcome::Succeeded { .. } => Ok(()),
            Outcome::Failed { attempts, error } => Err(CommandError::RetryExhausted {
                command: self.command.description().to_string(),
                attempts,
                source: Box::new(error),
            }),
        }
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        self.command.undo().await
    }
}
