//! CSV adapters used by the command-line interface.

pub mod balance_writer;
pub mod dead_letter_writer;
pub mod email_reader;
pub mod ledger_reader;
