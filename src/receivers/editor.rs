use crate::domain::command::{Command, CommandBox, Shared, lock};
use crate::domain::transaction::Transaction;
use crate::error::{CommandError, UndoFailure};
use async_trait::async_trait;

/// Text receiver with a cursor measured in characters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBuffer {
    text: String,
    cursor: usize,
}

impl TextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Inserts at the cursor and moves the cursor past the inserted text.
    pub fn insert(&mut self, s: &str) {
        let at = self.byte_offset(self.cursor);
        self.text.insert_str(at, s);
        self.cursor += s.chars().count();
    }

    /// Deletes up to `count` characters from the cursor and returns them.
    pub fn delete(&mut self, count: usize) -> String {
        let start = self.byte_offset(self.cursor);
        let end = self.byte_offset(self.cursor.saturating_add(count));
        self.text.drain(start..end).collect()
    }

    /// Moves the cursor to `position`, clamped to the text, and returns the
    /// previous position.
    pub fn move_cursor(&mut self, position: usize) -> usize {
        let previous = self.cursor;
        self.cursor = position.min(self.char_len());
        previous
    }

    fn byte_offset(&self, chars: usize) -> usize {
        self.text
            .char_indices()
            .nth(chars)
            .map_or(self.text.len(), |(offset, _)| offset)
    }
}

/// Inserts text at the cursor; undo deletes the inserted slice.
pub struct InsertText {
    buffer: Shared<TextBuffer>,
    text: String,
    start: Option<usize>,
    description: String,
}

impl InsertText {
    pub fn new(buffer: &Shared<TextBuffer>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            buffer: buffer.clone(),
            description: format!("Insert '{text}'"),
            text,
            start: None,
        }
    }
}

#[async_trait]
impl Command for InsertText {
    fn description(&self) -> &str {
        &self.description
    }

    fn executed(&self) -> bool {
        self.start.is_some()
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        if self.start.is_some() {
            return Err(CommandError::AlreadyExecuted {
                command: self.description.clone(),
            });
        }
        let mut buffer = lock(&self.buffer);
        self.start = Some(buffer.cursor());
        buffer.insert(&self.text);
        Ok(())
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        if let Some(start) = self.start.take() {
            let mut buffer = lock(&self.buffer);
            buffer.move_cursor(start);
            buffer.delete(self.text.chars().count());
        }
        Ok(())
    }
}

/// Deletes characters at the cursor; undo puts them back and restores the
/// cursor.
pub struct DeleteText {
    buffer: Shared<TextBuffer>,
    count: usize,
    deleted: Option<(usize, String)>,
    description: String,
}

impl DeleteText {
    pub fn new(buffer: &Shared<TextBuffer>, count: usize) -> Self {
        Self {
            buffer: buffer.clone(),
            count,
            deleted: None,
            description: format!("Delete {count} chars"),
        }
    }
}

#[async_trait]
impl Command for DeleteText {
    fn description(&self) -> &str {
        &self.description
    }

    fn executed(&self) -> bool {
        self.deleted.is_some()
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        if self.deleted.is_some() {
            return Err(CommandError::AlreadyExecuted {
                command: self.description.clone(),
            });
        }
        let mut buffer = lock(&self.buffer);
        let at = buffer.cursor();
        let removed = buffer.delete(self.count);
        self.deleted = Some((at, removed));
        Ok(())
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        if let Some((at, removed)) = self.deleted.take() {
            let mut buffer = lock(&self.buffer);
            buffer.move_cursor(at);
            buffer.insert(&removed);
            buffer.move_cursor(at);
        }
        Ok(())
    }
}

/// Moves the cursor to an absolute position; undo returns it.
pub struct MoveCursor {
    buffer: Shared<TextBuffer>,
    target: usize,
    previous: Option<usize>,
    description: String,
}

impl MoveCursor {
    pub fn new(buffer: &Shared<TextBuffer>, target: usize) -> Self {
        Self {
            buffer: buffer.clone(),
            target,
            previous: None,
            description: format!("Move cursor to {target}"),
        }
    }
}

#[async_trait]
impl Command for MoveCursor {
    fn description(&self) -> &str {
        &self.description
    }

    fn executed(&self) -> bool {
        self.previous.is_some()
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        if self.previous.is_some() {
            return Err(CommandError::AlreadyExecuted {
                command: self.description.clone(),
            });
        }
        self.previous = Some(lock(&self.buffer).move_cursor(self.target));
        Ok(())
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        if let Some(previous) = self.previous.take() {
            lock(&self.buffer).move_cursor(previous);
        }
        Ok(())
    }
}

/// Groups editor commands into one undoable step.
pub fn macro_command(items: Vec<CommandBox>) -> Transaction {
    Transaction::with_items("Macro", items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::{CommandExt, shared};

    fn text(buffer: &Shared<TextBuffer>) -> String {
        lock(buffer).text().to_string()
    }

    #[test]
    fn test_buffer_operations_use_char_positions() {
        let mut buffer = TextBuffer::new();
        buffer.insert("héllo");
        assert_eq!(buffer.cursor(), 5);

        buffer.move_cursor(1);
        assert_eq!(buffer.delete(2), "él");
        assert_eq!(buffer.text(), "hlo");

        assert_eq!(buffer.move_cursor(99), 1);
        assert_eq!(buffer.cursor(), 3);
        assert_eq!(buffer.delete(5), "");
    }

    #[tokio::test]
    async fn test_insert_and_undo() {
        let buffer = shared(TextBuffer::new());
        let mut cmd = InsertText::new(&buffer, "Hi");

        cmd.execute().await.unwrap();
        assert_eq!(text(&buffer), "Hi");

        cmd.undo().await.unwrap();
        cmd.undo().await.unwrap();
        assert_eq!(text(&buffer), "");
        assert_eq!(lock(&buffer).cursor(), 0);
    }

    #[tokio::test]
    async fn test_macro_execute_and_undo() {
        let buffer = shared(TextBuffer::new());
        let mut macro_cmd = macro_command(vec![
            InsertText::new(&buffer, "Hello").boxed(),
            InsertText::new(&buffer, " ").boxed(),
            InsertText::new(&buffer, "World").boxed(),
        ]);

        macro_cmd.execute().await.unwrap();
        assert_eq!(text(&buffer), "Hello World");

        macro_cmd.undo().await.unwrap();
        assert_eq!(text(&buffer), "");
    }

    #[tokio::test]
    async fn test_macro_undo_restores_existing_text() {
        let buffer = shared(TextBuffer::new());
        lock(&buffer).insert("abc");

        let mut macro_cmd = macro_command(vec![
            MoveCursor::new(&buffer, 1).boxed(),
            DeleteText::new(&buffer, 1).boxed(),
            InsertText::new(&buffer, "XY").boxed(),
        ]);

        macro_cmd.execute().await.unwrap();
        assert_eq!(text(&buffer), "aXYc");

        macro_cmd.undo().await.unwrap();
        assert_eq!(text(&buffer), "abc");
        assert_eq!(lock(&buffer).cursor(), 3);
    }

    #[tokio::test]
    async fn test_delete_undo_restores_cursor() {
        let buffer = shared(TextBuffer::new());
        lock(&buffer).insert("hello");
        lock(&buffer).move_cursor(0);

        let mut delete = DeleteText::new(&buffer, 2);
        delete.execute().await.unwrap();
        assert_eq!(text(&buffer), "llo");

        delete.undo().await.unwrap();
        assert_eq!(text(&buffer), "hello");
        assert_eq!(lock(&buffer).cursor(), 0);
    }
}
