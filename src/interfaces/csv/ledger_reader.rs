use crate::application::ledger::{LedgerOp, OpKind};
use crate::error::{EngineError, Result};
use crate::receivers::ledger::Cents;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer};
use std::io::Read;
use std::str::FromStr;

/// Row layout of a ledger CSV file. Amounts are major currency units.
#[derive(Debug, Deserialize, PartialEq, Clone)]
struct LedgerRecord {
    r#type: OpKind,
    account: String,
    #[serde(default)]
    counterparty: Option<String>,
    #[serde(default, deserialize_with = "deserialize_decimal")]
    amount: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_decimal")]
    limit: Option<Decimal>,
}

// Parsed from the raw text so that no value ever passes through f64.
fn deserialize_decimal<'de, D>(deserializer: D) -> std::result::Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => Decimal::from_str(raw.trim())
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

/// Converts a non-negative amount with at most two decimal places to cents.
pub fn to_cents(value: Decimal) -> Result<Cents> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(EngineError::InvalidRecord(format!(
            "amount must be non-negative: {value}"
        )));
    }
    if value.normalize().scale() > 2 {
        return Err(EngineError::InvalidRecord(format!(
            "amount has more than two decimal places: {value}"
        )));
    }
    value
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.to_i64())
        .map(Cents)
        .ok_or_else(|| EngineError::InvalidRecord(format!("amount out of range: {value}")))
}

impl TryFrom<LedgerRecord> for LedgerOp {
    type Error = EngineError;

    fn try_from(record: LedgerRecord) -> Result<Self> {
        Ok(LedgerOp {
            kind: record.r#type,
            account: record.account,
            counterparty: record.counterparty.filter(|c| !c.is_empty()),
            amount: record.amount.map(to_cents).transpose()?,
            limit: record.limit.map(to_cents).transpose()?,
        })
    }
}

/// Reads ledger operations from a CSV source.
///
/// Expects the header `type,account,counterparty,amount,limit`. Whitespace is
/// trimmed and short rows are accepted, missing trailing fields read as empty.
pub struct LedgerReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> LedgerReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes and validates each row.
    pub fn operations(self) -> impl Iterator<Item = Result<LedgerOp>> {
        self.reader
            .into_deserialize::<LedgerRecord>()
            .map(|result| result.map_err(EngineError::from).and_then(LedgerOp::try_from))
    }
}
