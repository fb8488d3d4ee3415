use crate::domain::command::{Command, CommandBox};
use crate::error::{CommandError, RollbackIncomplete, UndoFailure};
use async_trait::async_trait;
use tracing::{debug, warn};

/// An ordered group of commands executed and rolled back as one unit.
///
/// Items run in declaration order. When item `i` fails, items `[0, i)` are
/// undone in reverse order before the failure is returned, so the caller never
/// observes a partially applied transaction. A `Transaction` is itself a
/// [`Command`] and nests inside other transactions.
pub struct Transaction {
    description: String,
    items: Vec<CommandBox>,
    committed: usize,
    executed: bool,
}

impl Transaction {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            items: Vec::new(),
            committed: 0,
            executed: false,
        }
    }

    pub fn with_items(description: impl Into<String>, items: Vec<CommandBox>) -> Self {
        Self {
            items,
            ..Self::new(description)
        }
    }

    /// Appends a sub-command.
    pub fn push(&mut self, command: impl Command + 'static) {
        self.items.push(Box::new(command));
    }

    /// Builder form of [`Transaction::push`].
    pub fn then(mut self, command: impl Command + 'static) -> Self {
        self.push(command);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of items applied by the current attempt.
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Undoes the committed prefix in reverse order, continuing past failures.
    async fn rollback(&mut self) -> Vec<UndoFailure> {
        let mut failures = Vec::new();
        for item in self.items[..self.committed].iter_mut().rev() {
            if !item.executed() {
                continue;
            }
            debug!(transaction = %self.description, step = %item.description(), "undoing step");
            if let Err(failure) = item.undo().await {
                warn!(
                    transaction = %self.description,
                    error = %failure,
                    "undo failed during rollback; continuing"
                );
                failures.push(failure);
            }
        }
        self.committed = 0;
        failures
    }
}

#[async_trait]
impl Command for Transaction {
    fn description(&self) -> &str {
        &self.description
    }

    fn executed(&self) -> bool {
        self.executed
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        if self.executed {
            return Err(CommandError::AlreadyExecuted {
                command: self.description.clone(),
            });
        }

        self.committed = 0;
        for index in 0..self.items.len() {
            if let Err(cause) = self.items[index].execute().await {
                warn!(
                    transaction = %self.description,
                    step = index,
                    error = %cause,
                    "step failed; rolling back {} committed step(s)",
                    self.committed
                );
                let undo_failures = self.rollback().await;
                return Err(CommandError::TransactionFailed {
                    command: self.description.clone(),
                    failed_step: index,
                    source: Box::new(cause),
                    undo_failures,
                });
            }
            self.committed += 1;
        }

        self.executed = true;
        Ok(())
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        if !self.executed {
            return Ok(());
        }
        let failures = self.rollback().await;
        self.executed = false;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(UndoFailure::new(
                self.description.clone(),
                RollbackIncomplete { failures },
            ))
        }
    }
}
