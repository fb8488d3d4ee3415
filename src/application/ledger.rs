use crate::config::LedgerConfig;
use crate::domain::command::{Command, CommandBox, CommandExt, Shared, lock, shared};
use crate::error::{EngineError, Result};
use crate::receivers::ledger::{BankAccount, Cents, DepositCommand, WithdrawCommand, transfer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Open,
    Deposit,
    Withdraw,
    Transfer,
}

/// One ledger instruction.
///
/// `amount` is the opening balance for `open` and required for every other
/// kind. `counterparty` is the destination of a `transfer`. `limit` is the
/// overdraft limit for `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOp {
    pub kind: OpKind,
    pub account: String,
    pub counterparty: Option<String>,
    pub amount: Option<Cents>,
    pub limit: Option<Cents>,
}

impl LedgerOp {
    pub fn open(account: impl Into<String>, balance: Cents, limit: Cents) -> Self {
        Self {
            kind: OpKind::Open,
            account: account.into(),
            counterparty: None,
            amount: Some(balance),
            limit: Some(limit),
        }
    }

    pub fn deposit(account: impl Into<String>, amount: Cents) -> Self {
        Self::single(OpKind::Deposit, account, amount)
    }

    pub fn withdraw(account: impl Into<String>, amount: Cents) -> Self {
        Self::single(OpKind::Withdraw, account, amount)
    }

    pub fn transfer(
        account: impl Into<String>,
        counterparty: impl Into<String>,
        amount: Cents,
    ) -> Self {
        Self {
            kind: OpKind::Transfer,
            account: account.into(),
            counterparty: Some(counterparty.into()),
            amount: Some(amount),
            limit: None,
        }
    }

    fn single(kind: OpKind, account: impl Into<String>, amount: Cents) -> Self {
        Self {
            kind,
            account: account.into(),
            counterparty: None,
            amount: Some(amount),
            limit: None,
        }
    }
}

/// Final state of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account: String,
    pub balance: Cents,
    pub overdraft_limit: Cents,
}

impl From<&BankAccount> for AccountSnapshot {
    fn from(account: &BankAccount) -> Self {
        Self {
            account: account.name().to_string(),
            balance: account.balance(),
            overdraft_limit: account.overdraft_limit(),
        }
    }
}

/// Applies ledger operations as commands against a set of named accounts.
///
/// Operations run one at a time in submission order. Every operation goes
/// through a retry executor built from the engine's [`LedgerConfig`]; a
/// transfer that fails is rolled back before the error is returned.
pub struct LedgerEngine {
    accounts: BTreeMap<String, Shared<BankAccount>>,
    config: LedgerConfig,
}

impl Default for LedgerEngine {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

impl LedgerEngine {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            accounts: BTreeMap::new(),
            config,
        }
    }

    /// Receiver handle for `name`, if the account exists.
    pub fn account(&self, name: &str) -> Option<&Shared<BankAccount>> {
        self.accounts.get(name)
    }

    pub async fn process(&mut self, op: LedgerOp) -> Result<()> {
        let command: CommandBox = match op.kind {
            OpKind::Open => {
                if self.accounts.contains_key(&op.account) {
                    return Err(EngineError::DuplicateAccount(op.account));
                }
                let balance = op.amount.unwrap_or(Cents::ZERO);
                let limit = op.limit.unwrap_or(Cents::ZERO);
                if balance.is_negative() || limit.is_negative() {
                    return Err(EngineError::InvalidRecord(format!(
                        "open {}: balance and limit must be non-negative",
                        op.account
                    )));
                }
                debug!(account = %op.account, %balance, %limit, "opened account");
                let account = BankAccount::with_overdraft(op.account.clone(), balance, limit);
                self.accounts.insert(op.account, shared(account));
                return Ok(());
            }
            OpKind::Deposit => {
                let amount = required_amount(&op)?;
                DepositCommand::new(self.lookup(&op.account)?, amount).boxed()
            }
            OpKind::Withdraw => {
                let amount = required_amount(&op)?;
                WithdrawCommand::new(self.lookup(&op.account)?, amount).boxed()
            }
            OpKind::Transfer => {
                let amount = required_amount(&op)?;
                let destination = op.counterparty.as_deref().ok_or_else(|| {
                    EngineError::InvalidRecord(format!("transfer from {} needs a counterparty", op.account))
                })?;
                transfer(self.lookup(&op.account)?, self.lookup(destination)?, amount).boxed()
            }
        };

        let mut executor = command
            .with_retry(self.config.policy)
            .with_backoff(self.config.backoff);
        executor.execute().await?;
        debug!(command = %executor.description(), "applied");
        Ok(())
    }

    /// Consumes the engine and returns every account ordered by name.
    pub fn into_results(self) -> Vec<AccountSnapshot> {
        self.accounts
            .values()
            .map(|account| AccountSnapshot::from(&*lock(account)))
            .collect()
    }

    fn lookup(&self, name: &str) -> Result<&Shared<BankAccount>> {
        self.accounts
            .get(name)
            .ok_or_else(|| EngineError::UnknownAccount(name.to_string()))
    }
}

fn required_amount(op: &LedgerOp) -> Result<Cents> {
    op.amount.ok_or_else(|| {
        EngineError::InvalidRecord(format!("{:?} on {} needs an amount", op.kind, op.account))
    })
}
