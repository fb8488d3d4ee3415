use crate::application::executor::RetryExecutor;
use crate::domain::retry::RetryPolicy;
use crate::error::{CommandError, UndoFailure};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle through which commands reach their receiver.
///
/// Commands clone the handle, never the receiver itself; ownership stays with
/// whoever built the receiver.
pub type Shared<R> = Arc<Mutex<R>>;

/// Wraps a receiver in a [`Shared`] handle.
pub fn shared<R>(receiver: R) -> Shared<R> {
    Arc::new(Mutex::new(receiver))
}

/// Locks a receiver for a single synchronous operation.
///
/// Receiver operations either fully apply or leave state untouched, so a
/// poisoned lock still guards a consistent value and is recovered.
pub fn lock<R>(receiver: &Shared<R>) -> MutexGuard<'_, R> {
    receiver.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A named, reversible unit of work over some receiver.
///
/// `execute` either applies the forward action and flips `executed` to true,
/// or returns an error with state unchanged. `undo` reverses the most recent
/// successful `execute` and is a no-op when nothing is executed.
#[async_trait]
pub trait Command: Send + Sync {
    fn description(&self) -> &str;
    fn executed(&self) -> bool;
    async fn execute(&mut self) -> Result<(), CommandError>;
    async fn undo(&mut self) -> Result<(), UndoFailure>;
}

pub type CommandBox = Box<dyn Command>;

#[async_trait]
impl<C: Command + ?Sized> Command for Box<C> {
    fn description(&self) -> &str {
        (**self).description()
    }

    fn executed(&self) -> bool {
        (**self).executed()
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        (**self).execute().await
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        (**self).undo().await
    }
}

/// Adapters available on every concrete command.
pub trait CommandExt: Command + Sized + 'static {
    fn boxed(self) -> CommandBox {
        Box::new(self)
    }

    /// Runs this command under `policy` whenever it is executed.
    fn with_retry(self, policy: RetryPolicy) -> RetryExecutor<Self> {
        RetryExecutor::new(self, policy)
    }
}

impl<C: Command + Sized + 'static> CommandExt for C {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        value: Shared<i64>,
        executed: bool,
    }

    #[async_trait]
    impl Command for Counter {
        fn description(&self) -> &str {
            "increment"
        }

        fn executed(&self) -> bool {
            self.executed
        }

        async fn execute(&mut self) -> Result<(), CommandError> {
            *lock(&self.value) += 1;
            self.executed = true;
            Ok(())
        }

        async fn undo(&mut self) -> Result<(), UndoFailure> {
            if self.executed {
                *lock(&self.value) -= 1;
                self.executed = false;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_boxed_command_delegates() {
        let value = shared(0);
        let mut cmd = Counter {
            value: value.clone(),
            executed: false,
        }
        .boxed();

        cmd.execute().await.unwrap();
        assert!(cmd.executed());
        assert_eq!(*lock(&value), 1);

        cmd.undo().await.unwrap();
        cmd.undo().await.unwrap();
        assert!(!cmd.executed());
        assert_eq!(*lock(&value), 0);
    }

    #[test]
    fn test_poisoned_receiver_is_recovered() {
        let value = shared(7);
        let poisoner = value.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(value.is_poisoned());
        assert_eq!(*lock(&value), 7);
    }
}
