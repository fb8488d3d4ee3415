use super::envelope::{DeadLetterRecord, Envelope};
use crate::error::{QueueError, Rejected};
use async_trait::async_trait;
use std::sync::Arc;

/// FIFO storage for envelopes waiting to be processed.
///
/// `dequeue` must hand any given envelope to exactly one caller, even when
/// several workers poll the same queue. A failed `enqueue` returns the
/// envelope inside [`Rejected`].
#[async_trait]
pub trait EnvelopeQueue: Send + Sync {
    fn name(&self) -> &str;
    async fn enqueue(&self, envelope: Envelope) -> Result<(), Rejected>;
    /// Removes the head envelope, or fails with [`QueueError::Empty`].
    async fn dequeue(&self) -> Result<Envelope, QueueError>;
    async fn len(&self) -> Result<usize, QueueError>;

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }
}

/// Append-only store for envelopes whose retry budget is exhausted.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Stores `envelope`, or hands it back inside [`Rejected`].
    async fn append(&self, envelope: Envelope) -> Result<(), Rejected>;
    async fn len(&self) -> Result<usize, QueueError>;
    async fn records(&self) -> Result<Vec<DeadLetterRecord>, QueueError>;
    /// Hands every stored envelope back for replay, leaving the store empty.
    async fn take_all(&self) -> Result<Vec<Envelope>, QueueError>;
}

pub type EnvelopeQueueRef = Arc<dyn EnvelopeQueue>;
pub type DeadLetterStoreRef = Arc<dyn DeadLetterStore>;
