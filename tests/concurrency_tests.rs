use cmdtx::application::dispatch::{CommandBus, CommandWorker, DrainReport};
use cmdtx::domain::command::{Shared, lock, shared};
use cmdtx::domain::ports::{DeadLetterStoreRef, EnvelopeQueueRef};
use cmdtx::domain::retry::RetryPolicy;
use cmdtx::infrastructure::in_memory::{InMemoryDeadLetterStore, InMemoryQueue};
use cmdtx::receivers::ledger::{BankAccount, Cents, DepositCommand, WithdrawCommand};
use std::sync::Arc;

const ENVELOPES: usize = 200;
const WORKERS: usize = 4;

fn setup() -> (CommandBus, CommandWorker) {
    let queue: EnvelopeQueueRef = Arc::new(InMemoryQueue::new("concurrent"));
    let dead_letters: DeadLetterStoreRef = Arc::new(InMemoryDeadLetterStore::new());
    (
        CommandBus::new(queue.clone(), RetryPolicy::retries(1)),
        CommandWorker::new(queue, dead_letters),
    )
}

async fn drain_in_parallel(worker: &CommandWorker) -> Vec<DrainReport> {
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let worker = worker.clone();
            tokio::spawn(async move { worker.drain(usize::MAX).await.unwrap() })
        })
        .collect();

    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.await.unwrap());
    }
    reports
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_envelope_is_processed_exactly_once() {
    let (bus, worker) = setup();
    let accounts: Vec<Shared<BankAccount>> = (0..ENVELOPES)
        .map(|i| shared(BankAccount::new(format!("acc-{i}"), Cents::ZERO)))
        .collect();
    for account in &accounts {
        bus.send(DepositCommand::new(account, Cents(1)), None)
            .await
            .unwrap();
    }

    let reports = drain_in_parallel(&worker).await;

    let processed: usize = reports.iter().map(|r| r.processed).sum();
    let completed: usize = reports.iter().map(|r| r.completed).sum();
    assert_eq!(processed, ENVELOPES);
    assert_eq!(completed, ENVELOPES);
    for account in &accounts {
        assert_eq!(lock(account).balance(), Cents(1));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failures_reach_dead_letters_once() {
    let (bus, worker) = setup();
    let account = shared(BankAccount::new("shared", Cents::ZERO));
    for _ in 0..ENVELOPES {
        bus.send(WithdrawCommand::new(&account, Cents(1)), None)
            .await
            .unwrap();
    }

    drain_in_parallel(&worker).await;

    let dead = worker.dead_letters().await.unwrap();
    assert_eq!(dead.len(), ENVELOPES);
    assert!(dead.iter().all(|record| record.attempts == 2));
    assert_eq!(lock(&account).balance(), Cents::ZERO);
}
