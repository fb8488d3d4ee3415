use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::io::Read;

/// One row of a dispatch CSV file: `to,subject,body,max_retries`.
///
/// An empty `max_retries` means the dispatcher's default policy applies.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
pub struct EmailRequest {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

pub struct EmailReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> EmailReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn requests(self) -> impl Iterator<Item = Result<EmailRequest>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EngineError::from))
    }
}
