use clap::{Args, Parser, Subcommand};
use cmdtx::application::dispatch::{CommandBus, CommandWorker};
use cmdtx::application::ledger::LedgerEngine;
use cmdtx::config::{
    DEFAULT_BACKOFF, DEFAULT_MAX_RETRIES, DEFAULT_MAX_STEPS, DispatchConfig, LedgerConfig,
};
use cmdtx::domain::command::{lock, shared};
use cmdtx::domain::ports::{DeadLetterStoreRef, EnvelopeQueueRef};
use cmdtx::domain::retry::{BackoffMode, RetryPolicy};
use cmdtx::infrastructure::in_memory::{InMemoryDeadLetterStore, InMemoryQueue};
use cmdtx::interfaces::csv::balance_writer::BalanceWriter;
use cmdtx::interfaces::csv::dead_letter_writer::DeadLetterWriter;
use cmdtx::interfaces::csv::email_reader::EmailReader;
use cmdtx::interfaces::csv::ledger_reader::LedgerReader;
use cmdtx::logging::init_tracing;
use cmdtx::receivers::email::{DEFAULT_MAX_SUBJECT_LEN, EmailService, SendEmailCommand};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply ledger operations from a CSV file and print final balances
    Ledger(LedgerArgs),
    /// Queue one email per CSV row, drain the queue and print dead letters
    Dispatch(DispatchArgs),
}

#[derive(Args)]
struct LedgerArgs {
    /// Input operations CSV file (type,account,counterparty,amount,limit)
    input: PathBuf,

    /// Extra attempts for each failed operation
    #[arg(long, default_value_t = 0)]
    retries: u32,
}

#[derive(Args)]
struct DispatchArgs {
    /// Input emails CSV file (to,subject,body,max_retries)
    input: PathBuf,

    /// Maximum number of envelopes processed by the drain
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    max_steps: usize,

    /// Default retry count for rows without max_retries
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    retries: u32,

    /// Backoff between attempts, in milliseconds
    #[arg(long, default_value_t = DEFAULT_BACKOFF.as_millis() as u64)]
    backoff_ms: u64,

    /// How the backoff is applied
    #[arg(long, value_enum)]
    backoff: Option<BackoffMode>,

    /// Shorthand for `--backoff enforced`
    #[arg(long)]
    enforce_backoff: bool,

    /// Longest subject the email service accepts
    #[arg(long, default_value_t = DEFAULT_MAX_SUBJECT_LEN)]
    max_subject_len: usize,
}

impl From<&LedgerArgs> for LedgerConfig {
    fn from(args: &LedgerArgs) -> Self {
        Self {
            policy: RetryPolicy::retries(args.retries),
            backoff: BackoffMode::default(),
        }
    }
}

impl From<&DispatchArgs> for DispatchConfig {
    fn from(args: &DispatchArgs) -> Self {
        let backoff = if args.enforce_backoff {
            BackoffMode::Enforced
        } else {
            args.backoff.unwrap_or_default()
        };
        Self {
            default_policy: RetryPolicy::new(args.retries, Duration::from_millis(args.backoff_ms)),
            max_steps: args.max_steps,
            backoff,
            max_subject_len: args.max_subject_len,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ledger(args) => run_ledger(args).await,
        Commands::Dispatch(args) => run_dispatch(args).await,
    }
}

async fn run_ledger(args: LedgerArgs) -> Result<()> {
    let mut engine = LedgerEngine::new(LedgerConfig::from(&args));

    let file = File::open(&args.input).into_diagnostic()?;
    let reader = LedgerReader::new(file);
    for op_result in reader.operations() {
        match op_result {
            Ok(op) => {
                if let Err(e) = engine.process(op).await {
                    eprintln!("Error processing operation: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading operation: {}", e);
            }
        }
    }

    let accounts = engine.into_results();

    let stdout = io::stdout();
    let mut writer = BalanceWriter::new(stdout.lock());
    writer.write_accounts(&accounts).into_diagnostic()?;

    Ok(())
}

async fn run_dispatch(args: DispatchArgs) -> Result<()> {
    let config = DispatchConfig::from(&args);

    let service = shared(EmailService::new(config.max_subject_len));
    let queue: EnvelopeQueueRef = Arc::new(InMemoryQueue::new("emails"));
    let dead_letters: DeadLetterStoreRef = Arc::new(InMemoryDeadLetterStore::new());
    let bus = CommandBus::new(queue.clone(), config.default_policy);
    let worker = CommandWorker::new(queue, dead_letters).with_backoff(config.backoff);

    let file = File::open(&args.input).into_diagnostic()?;
    let reader = EmailReader::new(file);
    for request in reader.requests() {
        match request {
            Ok(request) => {
                let policy = request
                    .max_retries
                    .map(|n| RetryPolicy::new(n, config.default_policy.backoff));
                let command =
                    SendEmailCommand::new(&service, request.to, request.subject, request.body);
                bus.send(command, policy).await.into_diagnostic()?;
            }
            Err(e) => {
                eprintln!("Error reading email: {}", e);
            }
        }
    }

    let report = worker.drain(config.max_steps).await.into_diagnostic()?;
    info!(
        processed = report.processed,
        completed = report.completed,
        requeued = report.requeued,
        dead_lettered = report.dead_lettered,
        sent = lock(&service).outbox().len(),
        "dispatch finished"
    );

    let records = worker.dead_letters().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = DeadLetterWriter::new(stdout.lock());
    writer.write_records(&records).into_diagnostic()?;

    Ok(())
}
