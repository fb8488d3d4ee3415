use crate::domain::command::Command;
use crate::domain::envelope::{DeadLetterRecord, Envelope};
use crate::domain::ports::{DeadLetterStoreRef, EnvelopeQueueRef};
use crate::domain::retry::{BackoffMode, RetryPolicy};
use crate::error::{QueueError, Rejected};
use tracing::{debug, error, info, warn};

/// Producer side: wraps commands in envelopes and places them on a queue.
#[derive(Clone)]
pub struct CommandBus {
    queue: EnvelopeQueueRef,
    default_policy: RetryPolicy,
}

impl CommandBus {
    pub fn new(queue: EnvelopeQueueRef, default_policy: RetryPolicy) -> Self {
        Self {
            queue,
            default_policy,
        }
    }

    /// Enqueues `command`, using the bus's default policy unless one is given.
    /// A refused envelope comes back inside the error.
    pub async fn send(
        &self,
        command: impl Command + 'static,
        retry_policy: Option<RetryPolicy>,
    ) -> Result<(), Rejected> {
        let envelope = Envelope::new(command, retry_policy.unwrap_or(self.default_policy));
        debug!(
            command = %envelope.description(),
            queue = %self.queue.name(),
            "enqueued command"
        );
        self.queue.enqueue(envelope).await
    }
}

/// Result of a single worker step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The queue was empty; nothing was processed.
    Idle,
    Completed,
    /// The command failed and went back to the tail of the queue.
    Requeued { attempts: u32 },
    /// The command failed and its retry budget is spent.
    DeadLettered { attempts: u32 },
}

/// Counts accumulated by one [`CommandWorker::drain`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub completed: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
    /// Size of the dead-letter store once the drain finished.
    pub dead_letter_total: usize,
}

/// Consumer side: pulls envelopes, executes their commands and applies the
/// retry policy. The caller owns the scheduling loop.
#[derive(Clone)]
pub struct CommandWorker {
    queue: EnvelopeQueueRef,
    dead_letters: DeadLetterStoreRef,
    backoff: BackoffMode,
}

impl CommandWorker {
    pub fn new(queue: EnvelopeQueueRef, dead_letters: DeadLetterStoreRef) -> Self {
        Self {
            queue,
            dead_letters,
            backoff: BackoffMode::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffMode) -> Self {
        self.backoff = backoff;
        self
    }

    /// Processes at most one envelope.
    ///
    /// A failed envelope is never dropped on a backend error. If the queue
    /// refuses a requeue it goes to the dead-letter store, and if the store
    /// refuses it the envelope goes back on the queue. When both refuse, it
    /// is returned in [`QueueError::Unplaced`].
    pub async fn poll_once(&self) -> Result<PollOutcome, QueueError> {
        let mut envelope = match self.queue.dequeue().await {
            Ok(envelope) => envelope,
            Err(QueueError::Empty(_)) => return Ok(PollOutcome::Idle),
            Err(err) => return Err(err),
        };

        let result = envelope.command_mut().execute().await;
        let err = match result {
            Ok(()) => {
                info!(command = %envelope.description(), "executed");
                return Ok(PollOutcome::Completed);
            }
            Err(err) => err,
        };

        envelope.record_failure(&err);
        let attempts = envelope.attempts();
        let policy = envelope.retry_policy();
        if envelope.can_retry() {
            warn!(
                command = %envelope.description(),
                attempt = attempts,
                max_retries = policy.max_retries,
                backoff = ?policy.backoff,
                error = %err,
                "retrying"
            );
            self.backoff.pause(&policy).await;
            match self.queue.enqueue(envelope).await {
                Ok(()) => Ok(PollOutcome::Requeued { attempts }),
                Err(rejected) => Err(self.park_in_dead_letters(rejected).await),
            }
        } else {
            error!(
                command = %envelope.description(),
                attempts,
                error = %err,
                "dead-lettered"
            );
            match self.dead_letters.append(envelope).await {
                Ok(()) => Ok(PollOutcome::DeadLettered { attempts }),
                Err(rejected) => Err(self.return_to_queue(rejected).await),
            }
        }
    }

    async fn park_in_dead_letters(&self, rejected: Rejected) -> QueueError {
        let Rejected { envelope, error } = rejected;
        warn!(
            command = %envelope.description(),
            %error,
            "requeue refused, moving to dead letters"
        );
        match self.dead_letters.append(envelope).await {
            Ok(()) => error,
            Err(again) => unplaced(vec![again.envelope], again.error),
        }
    }

    // The envelope is retried once more on a later poll and dead-lettered
    // again when the store is back.
    async fn return_to_queue(&self, rejected: Rejected) -> QueueError {
        let Rejected { envelope, error } = rejected;
        error!(
            command = %envelope.description(),
            %error,
            "dead-letter store refused envelope, returning it to the queue"
        );
        match self.queue.enqueue(envelope).await {
            Ok(()) => error,
            Err(again) => unplaced(vec![again.envelope], again.error),
        }
    }

    /// Polls until the queue is empty or `max_steps` envelopes were processed.
    ///
    /// The step cap bounds one call when requeued envelopes keep cycling.
    pub async fn drain(&self, max_steps: usize) -> Result<DrainReport, QueueError> {
        let mut report = DrainReport::default();
        while report.processed < max_steps {
            match self.poll_once().await? {
                PollOutcome::Idle => break,
                PollOutcome::Completed => report.completed += 1,
                PollOutcome::Requeued { .. } => report.requeued += 1,
                PollOutcome::DeadLettered { .. } => report.dead_lettered += 1,
            }
            report.processed += 1;
        }
        report.dead_letter_total = self.dead_letters.len().await?;
        info!(
            queue = %self.queue.name(),
            processed = report.processed,
            completed = report.completed,
            requeued = report.requeued,
            dead_lettered = report.dead_lettered,
            "drain finished"
        );
        Ok(report)
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetterRecord>, QueueError> {
        self.dead_letters.records().await
    }

    /// Moves every dead-lettered envelope back onto the queue with a fresh
    /// retry budget. Returns how many were requeued.
    ///
    /// If the queue refuses one, that envelope and every one not yet replayed
    /// go back to the dead-letter store with their attempt counts intact.
    pub async fn replay_dead_letters(&self) -> Result<usize, QueueError> {
        let mut pending = self.dead_letters.take_all().await?.into_iter();
        let mut count = 0;
        while let Some(mut envelope) = pending.next() {
            let attempts = envelope.reset_attempts();
            if let Err(Rejected { mut envelope, error }) = self.queue.enqueue(envelope).await {
                envelope.restore_attempts(attempts);
                warn!(
                    queue = %self.queue.name(),
                    replayed = count,
                    %error,
                    "replay interrupted"
                );
                let mut stranded = Vec::new();
                for envelope in std::iter::once(envelope).chain(pending) {
                    if let Err(again) = self.dead_letters.append(envelope).await {
                        stranded.push(again.envelope);
                    }
                }
                return Err(if stranded.is_empty() {
                    error
                } else {
                    unplaced(stranded, error)
                });
            }
            count += 1;
        }
        info!(queue = %self.queue.name(), count, "replayed dead letters");
        Ok(count)
    }
}

fn unplaced(envelopes: Vec<Envelope>, error: QueueError) -> QueueError {
    QueueError::Unplaced {
        envelopes,
        error: Box::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::{Shared, lock, shared};
    use crate::domain::ports::{DeadLetterStore, EnvelopeQueue};
    use crate::error::{CommandError, UndoFailure};
    use crate::infrastructure::in_memory::{InMemoryDeadLetterStore, InMemoryQueue};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error("boom")]
    struct Boom;

    /// Journals every attempt; fails while `failures_left` is positive.
    struct Flaky {
        name: String,
        journal: Shared<Vec<String>>,
        failures_left: u32,
        executed: bool,
    }

    impl Flaky {
        fn new(name: &str, journal: &Shared<Vec<String>>, failures: u32) -> Self {
            Self {
                name: name.to_string(),
                journal: journal.clone(),
                failures_left: failures,
                executed: false,
            }
        }
    }

    #[async_trait]
    impl Command for Flaky {
        fn description(&self) -> &str {
            &self.name
        }

        fn executed(&self) -> bool {
            self.executed
        }

        async fn execute(&mut self) -> Result<(), CommandError> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                lock(&self.journal).push(format!("{} failed", self.name));
                return Err(CommandError::receiver(&self.name, Boom));
            }
            lock(&self.journal).push(format!("{} ok", self.name));
            self.executed = true;
            Ok(())
        }

        async fn undo(&mut self) -> Result<(), UndoFailure> {
            self.executed = false;
            Ok(())
        }
    }

    fn down() -> QueueError {
        QueueError::Backend("down".to_string())
    }

    /// Dead-letter store whose backend is unreachable.
    struct OfflineStore;

    #[async_trait]
    impl DeadLetterStore for OfflineStore {
        async fn append(&self, envelope: Envelope) -> Result<(), Rejected> {
            Err(Rejected::new(envelope, down()))
        }

        async fn len(&self) -> Result<usize, QueueError> {
            Err(down())
        }

        async fn records(&self) -> Result<Vec<DeadLetterRecord>, QueueError> {
            Err(down())
        }

        async fn take_all(&self) -> Result<Vec<Envelope>, QueueError> {
            Err(down())
        }
    }

    /// In-memory queue that refuses new envelopes once `closed` is set.
    struct ClosableQueue {
        inner: InMemoryQueue,
        closed: AtomicBool,
    }

    impl ClosableQueue {
        fn new() -> Self {
            Self {
                inner: InMemoryQueue::new("test"),
                closed: AtomicBool::new(false),
            }
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EnvelopeQueue for ClosableQueue {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn enqueue(&self, envelope: Envelope) -> Result<(), Rejected> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Rejected::new(envelope, down()));
            }
            self.inner.enqueue(envelope).await
        }

        async fn dequeue(&self) -> Result<Envelope, QueueError> {
            self.inner.dequeue().await
        }

        async fn len(&self) -> Result<usize, QueueError> {
            self.inner.len().await
        }
    }

    fn setup() -> (CommandBus, CommandWorker) {
        let queue: EnvelopeQueueRef = Arc::new(InMemoryQueue::new("test"));
        let dead_letters: DeadLetterStoreRef = Arc::new(InMemoryDeadLetterStore::new());
        (
            CommandBus::new(queue.clone(), RetryPolicy::retries(3)),
            CommandWorker::new(queue, dead_letters),
        )
    }

    #[tokio::test]
    async fn test_poll_on_empty_queue_is_idle() {
        let (_, worker) = setup();
        assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Idle);
        let report = worker.drain(10).await.unwrap();
        assert_eq!(report, DrainReport::default());
    }

    #[tokio::test]
    async fn test_fifo_with_dead_letter() {
        let (bus, worker) = setup();
        let journal = shared(Vec::new());
        bus.send(Flaky::new("c1", &journal, 0), None).await.unwrap();
        bus.send(Flaky::new("c2", &journal, u32::MAX), Some(RetryPolicy::retries(1)))
            .await
            .unwrap();

        let report = worker.drain(100).await.unwrap();

        assert_eq!(*lock(&journal), vec!["c1 ok", "c2 failed", "c2 failed"]);
        assert_eq!(report.processed, 3);
        assert_eq!(report.completed, 1);
        assert_eq!(report.requeued, 1);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.dead_letter_total, 1);

        let dead = worker.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].command, "c2");
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(dead[0].last_error.as_deref(), Some("c2: boom"));
    }

    #[tokio::test]
    async fn test_requeue_goes_to_tail() {
        let (bus, worker) = setup();
        let journal = shared(Vec::new());
        bus.send(Flaky::new("flaky", &journal, 1), None).await.unwrap();
        bus.send(Flaky::new("steady", &journal, 0), None).await.unwrap();

        assert_eq!(
            worker.poll_once().await.unwrap(),
            PollOutcome::Requeued { attempts: 1 }
        );
        assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Completed);
        assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Completed);
        assert_eq!(
            *lock(&journal),
            vec!["flaky failed", "steady ok", "flaky ok"]
        );
    }

    #[tokio::test]
    async fn test_zero_retries_dead_letters_on_first_failure() {
        let (bus, worker) = setup();
        let journal = shared(Vec::new());
        bus.send(Flaky::new("once", &journal, 1), Some(RetryPolicy::NONE))
            .await
            .unwrap();

        assert_eq!(
            worker.poll_once().await.unwrap(),
            PollOutcome::DeadLettered { attempts: 1 }
        );
    }

    #[tokio::test]
    async fn test_drain_respects_step_cap() {
        let (bus, worker) = setup();
        let journal = shared(Vec::new());
        bus.send(Flaky::new("stubborn", &journal, u32::MAX), Some(RetryPolicy::retries(100)))
            .await
            .unwrap();

        let report = worker.drain(5).await.unwrap();

        assert_eq!(report.processed, 5);
        assert_eq!(report.requeued, 5);
        assert_eq!(report.dead_letter_total, 0);
        assert_eq!(lock(&journal).len(), 5);
    }

    #[tokio::test]
    async fn test_replay_dead_letters() {
        let (bus, worker) = setup();
        let journal = shared(Vec::new());
        bus.send(Flaky::new("late", &journal, 2), Some(RetryPolicy::retries(1)))
            .await
            .unwrap();

        let first = worker.drain(10).await.unwrap();
        assert_eq!(first.dead_lettered, 1);

        assert_eq!(worker.replay_dead_letters().await.unwrap(), 1);
        let second = worker.drain(10).await.unwrap();

        assert_eq!(second.completed, 1);
        assert_eq!(second.dead_letter_total, 0);
        assert_eq!(lock(&journal).last().map(String::as_str), Some("late ok"));
    }

    #[tokio::test]
    async fn test_refused_dead_letter_stays_queued() {
        let queue = Arc::new(InMemoryQueue::new("test"));
        let bus = CommandBus::new(queue.clone(), RetryPolicy::NONE);
        let worker = CommandWorker::new(queue.clone(), Arc::new(OfflineStore));
        let journal = shared(Vec::new());
        bus.send(Flaky::new("mail", &journal, u32::MAX), None)
            .await
            .unwrap();

        let err = worker.poll_once().await.unwrap_err();

        assert!(matches!(err, QueueError::Backend(msg) if msg == "down"));
        assert_eq!(queue.len().await.unwrap(), 1);
        let envelope = queue.dequeue().await.unwrap();
        assert_eq!(envelope.description(), "mail");
        assert_eq!(envelope.attempts(), 1);
        assert_eq!(envelope.last_error(), Some("mail: boom"));
    }

    #[tokio::test]
    async fn test_refused_requeue_moves_to_dead_letters() {
        let queue = Arc::new(ClosableQueue::new());
        let bus = CommandBus::new(queue.clone(), RetryPolicy::retries(3));
        let worker = CommandWorker::new(queue.clone(), Arc::new(InMemoryDeadLetterStore::new()));
        let journal = shared(Vec::new());
        bus.send(Flaky::new("flaky", &journal, 1), None).await.unwrap();
        queue.close();

        assert!(matches!(
            worker.poll_once().await,
            Err(QueueError::Backend(_))
        ));

        let dead = worker.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].command, "flaky");
        assert_eq!(dead[0].attempts, 1);
        assert!(matches!(
            bus.send(Flaky::new("late", &journal, 0), None).await,
            Err(Rejected { envelope, .. }) if envelope.description() == "late"
        ));
    }

    #[tokio::test]
    async fn test_both_backends_down_hands_envelope_back() {
        let queue = Arc::new(ClosableQueue::new());
        let bus = CommandBus::new(queue.clone(), RetryPolicy::NONE);
        let worker = CommandWorker::new(queue.clone(), Arc::new(OfflineStore));
        let journal = shared(Vec::new());
        bus.send(Flaky::new("doomed", &journal, u32::MAX), None)
            .await
            .unwrap();
        queue.close();

        let err = worker.poll_once().await.unwrap_err();

        match err {
            QueueError::Unplaced { envelopes, .. } => {
                assert_eq!(envelopes.len(), 1);
                assert_eq!(envelopes[0].description(), "doomed");
                assert_eq!(envelopes[0].attempts(), 1);
            }
            other => panic!("expected unplaced envelopes, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_interrupted_replay_returns_envelopes_to_dead_letters() {
        let queue = Arc::new(ClosableQueue::new());
        let bus = CommandBus::new(queue.clone(), RetryPolicy::NONE);
        let worker = CommandWorker::new(queue.clone(), Arc::new(InMemoryDeadLetterStore::new()));
        let journal = shared(Vec::new());
        bus.send(Flaky::new("first", &journal, u32::MAX), None)
            .await
            .unwrap();
        bus.send(Flaky::new("second", &journal, u32::MAX), None)
            .await
            .unwrap();
        assert_eq!(worker.drain(10).await.unwrap().dead_letter_total, 2);
        queue.close();

        assert!(matches!(
            worker.replay_dead_letters().await,
            Err(QueueError::Backend(_))
        ));

        let dead = worker.dead_letters().await.unwrap();
        let names: Vec<&str> = dead.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(dead.iter().all(|r| r.attempts == 1));
        assert!(queue.is_empty().await.unwrap());
    }
}
