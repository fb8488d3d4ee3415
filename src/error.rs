use crate::domain::envelope::Envelope;
use thiserror::Error;

/// Boxed error raised by a receiver. Commands keep it as the source of
/// their failure so callers can downcast to the concrete receiver error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a command's forward action.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The receiver refused the operation (insufficient funds, device not
    /// connected, program already running, ...).
    #[error("{command}: {source}")]
    Receiver {
        command: String,
        #[source]
        source: BoxError,
    },
    #[error("'{command}' has already been executed")]
    AlreadyExecuted { command: String },
    /// Raised by a transaction after it has finished its best-effort rollback.
    #[error("transaction '{command}' rolled back after step {failed_step} failed: {source}")]
    TransactionFailed {
        command: String,
        failed_step: usize,
        #[source]
        source: Box<CommandError>,
        undo_failures: Vec<UndoFailure>,
    },
    #[error("'{command}' failed after {attempts} attempt(s): {source}")]
    RetryExhausted {
        command: String,
        attempts: u32,
        #[source]
        source: Box<CommandError>,
    },
}

impl CommandError {
    pub fn receiver(command: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Receiver {
            command: command.into(),
            source: source.into(),
        }
    }

    /// The wrapped failure of a transaction or retry error.
    pub fn source_command_error(&self) -> Option<&CommandError> {
        match self {
            Self::TransactionFailed { source, .. } | Self::RetryExhausted { source, .. } => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }

    /// Walks through transaction and retry wrappers down to the error that
    /// started the failure.
    pub fn root_cause(&self) -> &CommandError {
        match self {
            Self::TransactionFailed { source, .. } | Self::RetryExhausted { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Downcasts the originating receiver error, if there is one of type `E`.
    pub fn receiver_error<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self.root_cause() {
            Self::Receiver { source, .. } => source.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Undo failures recorded by the outermost transaction rollback.
    pub fn undo_failures(&self) -> &[UndoFailure] {
        match self {
            Self::TransactionFailed { undo_failures, .. } => undo_failures,
            Self::RetryExhausted { source, .. } => source.undo_failures(),
            _ => &[],
        }
    }

    /// True when any rollback in the failure chain left a step un-reversed.
    /// Such a failure needs manual reconciliation.
    pub fn needs_reconciliation(&self) -> bool {
        match self {
            Self::TransactionFailed {
                source,
                undo_failures,
                ..
            } => !undo_failures.is_empty() || source.needs_reconciliation(),
            Self::RetryExhausted { source, .. } => source.needs_reconciliation(),
            _ => false,
        }
    }
}

/// A compensating action that could not be applied.
#[derive(Error, Debug)]
#[error("undo of '{command}' failed: {source}")]
pub struct UndoFailure {
    pub command: String,
    #[source]
    pub source: BoxError,
}

impl UndoFailure {
    pub fn new(command: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            command: command.into(),
            source: source.into(),
        }
    }
}

/// Reported by a transaction whose explicit undo skipped over failing steps.
#[derive(Error, Debug)]
#[error("{} step(s) could not be undone", .failures.len())]
pub struct RollbackIncomplete {
    pub failures: Vec<UndoFailure>,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue '{0}' is empty")]
    Empty(String),
    #[error("queue backend error: {0}")]
    Backend(String),
    /// Neither the queue nor the dead-letter store took these envelopes; the
    /// caller now owns them.
    #[error("{} envelope(s) could not be stored: {error}", .envelopes.len())]
    Unplaced {
        envelopes: Vec<Envelope>,
        error: Box<QueueError>,
    },
}

/// An envelope a backend refused to store, handed back to the caller.
#[derive(Error, Debug)]
#[error("'{}' was not stored: {error}", .envelope.description())]
pub struct Rejected {
    pub envelope: Envelope,
    pub error: QueueError,
}

impl Rejected {
    pub fn new(envelope: Envelope, error: QueueError) -> Self {
        Self { envelope, error }
    }
}

/// Errors surfaced by the application layer and the CLI.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Unknown account: {0}")]
    UnknownAccount(String),
    #[error("Account already exists: {0}")]
    DuplicateAccount(String),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
