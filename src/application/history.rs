use crate::domain::command::{Command, CommandBox};
use crate::error::{CommandError, UndoFailure};
use std::collections::VecDeque;
use tracing::debug;

pub const DEFAULT_UNDO_LIMIT: usize = 100;

/// Linear undo/redo history over executed commands.
///
/// Only successfully executed commands are recorded. Running a new command
/// discards the redo stack.
pub struct CommandHistory {
    undo_stack: VecDeque<CommandBox>,
    redo_stack: Vec<CommandBox>,
    undo_limit: usize,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_LIMIT)
    }
}

impl CommandHistory {
    /// Creates a history that keeps at most `undo_limit` entries (at least 1).
    pub fn new(undo_limit: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            undo_limit: undo_limit.max(1),
        }
    }

    pub fn undo_limit(&self) -> usize {
        self.undo_limit
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Executes `command` and records it. A failed command is not recorded
    /// and leaves both stacks untouched.
    pub async fn run(&mut self, command: impl Command + 'static) -> Result<(), CommandError> {
        let mut command: CommandBox = Box::new(command);
        command.execute().await?;
        self.undo_stack.push_back(command);
        if self.undo_stack.len() > self.undo_limit
            && let Some(dropped) = self.undo_stack.pop_front()
        {
            debug!(command = %dropped.description(), "dropped from undo history");
        }
        self.redo_stack.clear();
        Ok(())
    }

    /// Undoes the most recent command. Returns `false` when there is nothing
    /// to undo. A command whose undo fails stays on the undo stack.
    pub async fn undo(&mut self) -> Result<bool, UndoFailure> {
        let Some(mut command) = self.undo_stack.pop_back() else {
            return Ok(false);
        };
        if let Err(failure) = command.undo().await {
            self.undo_stack.push_back(command);
            return Err(failure);
        }
        self.redo_stack.push(command);
        Ok(true)
    }

    /// Re-executes the most recently undone command. Returns `false` when
    /// there is nothing to redo. A command that fails again stays on the redo
    /// stack.
    pub async fn redo(&mut self) -> Result<bool, CommandError> {
        let Some(mut command) = self.redo_stack.pop() else {
            return Ok(false);
        };
        if let Err(err) = command.execute().await {
            self.redo_stack.push(command);
            return Err(err);
        }
        self.undo_stack.push_back(command);
        Ok(true)
    }
}
