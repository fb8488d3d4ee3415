use crate::application::ledger::AccountSnapshot;
use crate::error::Result;
use crate::receivers::ledger::Cents;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// Converts cents back to major units with exactly two decimal places.
pub fn to_decimal(cents: Cents) -> Decimal {
    Decimal::new(cents.value(), 2)
}

#[derive(Debug, Serialize)]
struct BalanceRow<'a> {
    account: &'a str,
    balance: Decimal,
    overdraft_limit: Decimal,
}

impl<'a> From<&'a AccountSnapshot> for BalanceRow<'a> {
    fn from(snapshot: &'a AccountSnapshot) -> Self {
        Self {
            account: &snapshot.account,
            balance: to_decimal(snapshot.balance),
            overdraft_limit: to_decimal(snapshot.overdraft_limit),
        }
    }
}

/// Writes final account balances as CSV `account,balance,overdraft_limit`.
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_accounts(&mut self, accounts: &[AccountSnapshot]) -> Result<()> {
        if accounts.is_empty() {
            self.writer
                .write_record(["account", "balance", "overdraft_limit"])?;
        }
        for snapshot in accounts {
            self.writer.serialize(BalanceRow::from(snapshot))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
