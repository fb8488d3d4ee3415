use crate::domain::envelope::{DeadLetterRecord, Envelope};
use crate::domain::ports::{DeadLetterStore, EnvelopeQueue};
use crate::error::{QueueError, Rejected};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A thread-safe in-memory FIFO of envelopes.
///
/// Uses `Arc<Mutex<VecDeque<Envelope>>>` so clones share one queue; each
/// `dequeue` is a single locked `pop_front`, which makes it atomic across
/// concurrent workers.
#[derive(Clone)]
pub struct InMemoryQueue {
    name: Arc<str>,
    envelopes: Arc<Mutex<VecDeque<Envelope>>>,
}

impl InMemoryQueue {
    /// Creates a new, empty queue with a logical name used in logs.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            envelopes: Arc::default(),
        }
    }
}

#[async_trait]
impl EnvelopeQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, envelope: Envelope) -> Result<(), Rejected> {
        self.envelopes.lock().await.push_back(envelope);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Envelope, QueueError> {
        self.envelopes
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| QueueError::Empty(self.name.to_string()))
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.envelopes.lock().await.len())
    }
}

/// A thread-safe in-memory dead-letter store.
#[derive(Default, Clone)]
pub struct InMemoryDeadLetterStore {
    envelopes: Arc<Mutex<Vec<Envelope>>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn append(&self, envelope: Envelope) -> Result<(), Rejected> {
        self.envelopes.lock().await.push(envelope);
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.envelopes.lock().await.len())
    }

    async fn records(&self) -> Result<Vec<DeadLetterRecord>, QueueError> {
        let envelopes = self.envelopes.lock().await;
        Ok(envelopes.iter().map(DeadLetterRecord::from).collect())
    }

    async fn take_all(&self) -> Result<Vec<Envelope>, QueueError> {
        Ok(std::mem::take(&mut *self.envelopes.lock().await))
    }
}
