use crate::domain::envelope::DeadLetterRecord;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct DeadLetterRow<'a> {
    command: &'a str,
    attempts: u32,
    last_error: Option<&'a str>,
}

/// Writes dead letters as CSV `command,attempts,last_error`.
pub struct DeadLetterWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> DeadLetterWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_records(&mut self, records: &[DeadLetterRecord]) -> Result<()> {
        if records.is_empty() {
            self.writer.write_record(["command", "attempts", "last_error"])?;
        }
        for record in records {
            self.writer.serialize(DeadLetterRow {
                command: &record.command,
                attempts: record.attempts,
                last_error: record.last_error.as_deref(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
