use crate::domain::command::{Command, Shared, lock};
use crate::domain::transaction::Transaction;
use crate::error::{CommandError, UndoFailure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A monetary value in integer minor currency units.
///
/// No floating point is involved anywhere in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Cents(pub i64);

impl Cents {
    pub const ZERO: Self = Self(0);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `None` when the sum leaves the `i64` range.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}c", self.0)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AccountError {
    #[error("{account}: amount must be non-negative, got {amount}")]
    NegativeAmount { account: String, amount: Cents },
    #[error(
        "{account}: insufficient funds (balance {balance}, requested {requested}, overdraft limit {limit})"
    )]
    InsufficientFunds {
        account: String,
        balance: Cents,
        requested: Cents,
        limit: Cents,
    },
    #[error("{account}: balance would overflow (balance {balance}, amount {amount})")]
    Overflow {
        account: String,
        balance: Cents,
        amount: Cents,
    },
}

/// Simple bank account receiver.
///
/// The balance may go negative down to `-overdraft_limit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    name: String,
    balance: Cents,
    overdraft_limit: Cents,
}

impl BankAccount {
    pub fn new(name: impl Into<String>, balance: Cents) -> Self {
        Self::with_overdraft(name, balance, Cents::ZERO)
    }

    pub fn with_overdraft(name: impl Into<String>, balance: Cents, overdraft_limit: Cents) -> Self {
        Self {
            name: name.into(),
            balance,
            overdraft_limit,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balance(&self) -> Cents {
        self.balance
    }

    pub fn overdraft_limit(&self) -> Cents {
        self.overdraft_limit
    }

    pub fn deposit(&mut self, amount: Cents) -> Result<(), AccountError> {
        self.check_amount(amount)?;
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| self.overflow(amount))?;
        Ok(())
    }

    /// Removes money if the result stays within the overdraft floor.
    pub fn withdraw(&mut self, amount: Cents) -> Result<(), AccountError> {
        self.check_amount(amount)?;
        let next = self
            .balance
            .checked_sub(amount)
            .ok_or_else(|| self.overflow(amount))?;
        if next < Cents(self.overdraft_limit.0.saturating_neg()) {
            return Err(AccountError::InsufficientFunds {
                account: self.name.clone(),
                balance: self.balance,
                requested: amount,
                limit: self.overdraft_limit,
            });
        }
        self.balance = next;
        Ok(())
    }

    fn overflow(&self, amount: Cents) -> AccountError {
        AccountError::Overflow {
            account: self.name.clone(),
            balance: self.balance,
            amount,
        }
    }

    fn check_amount(&self, amount: Cents) -> Result<(), AccountError> {
        if amount.is_negative() {
            Err(AccountError::NegativeAmount {
                account: self.name.clone(),
                amount,
            })
        } else {
            Ok(())
        }
    }
}

/// Deposits into an account; undo withdraws the same amount.
pub struct DepositCommand {
    account: Shared<BankAccount>,
    amount: Cents,
    description: String,
    executed: bool,
}

impl DepositCommand {
    pub fn new(account: &Shared<BankAccount>, amount: Cents) -> Self {
        let description = format!("Deposit {amount} to {}", lock(account).name());
        Self {
            account: account.clone(),
            amount,
            description,
            executed: false,
        }
    }
}

#[async_trait]
impl Command for DepositCommand {
    fn description(&self) -> &str {
        &self.description
    }

    fn executed(&self) -> bool {
        self.executed
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        if self.executed {
            return Err(CommandError::AlreadyExecuted {
                command: self.description.clone(),
            });
        }
        lock(&self.account)
            .deposit(self.amount)
            .map_err(|e| CommandError::receiver(&self.description, e))?;
        self.executed = true;
        Ok(())
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        if !self.executed {
            return Ok(());
        }
        lock(&self.account)
            .withdraw(self.amount)
            .map_err(|e| UndoFailure::new(&self.description, e))?;
        self.executed = false;
        Ok(())
    }
}

/// Withdraws from an account; undo re-deposits the same amount.
pub struct WithdrawCommand {
    account: Shared<BankAccount>,
    amount: Cents,
    description: String,
    executed: bool,
}

impl WithdrawCommand {
    pub fn new(account: &Shared<BankAccount>, amount: Cents) -> Self {
        let description = format!("Withdraw {amount} from {}", lock(account).name());
        Self {
            account: account.clone(),
            amount,
            description,
            executed: false,
        }
    }
}

#[async_trait]
impl Command for WithdrawCommand {
    fn description(&self) -> &str {
        &self.description
    }

    fn executed(&self) -> bool {
        self.executed
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        if self.executed {
            return Err(CommandError::AlreadyExecuted {
                command: self.description.clone(),
            });
        }
        lock(&self.account)
            .withdraw(self.amount)
            .map_err(|e| CommandError::receiver(&self.description, e))?;
        self.executed = true;
        Ok(())
    }

    async fn undo(&mut self) -> Result<(), UndoFailure> {
        if !self.executed {
            return Ok(());
        }
        lock(&self.account)
            .deposit(self.amount)
            .map_err(|e| UndoFailure::new(&self.description, e))?;
        self.executed = false;
        Ok(())
    }
}

/// Atomic transfer: withdraw from `source`, then deposit into `destination`.
/// If the deposit fails the withdrawal is compensated.
pub fn transfer(
    source: &Shared<BankAccount>,
    destination: &Shared<BankAccount>,
    amount: Cents,
) -> Transaction {
    // One lock at a time: source and destination may be the same account.
    let from = lock(source).name().to_string();
    let to = lock(destination).name().to_string();
    let description = format!("Transfer {amount} {from} -> {to}");
    Transaction::new(description)
        .then(WithdrawCommand::new(source, amount))
        .then(DepositCommand::new(destination, amount))
}
