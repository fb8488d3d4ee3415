//! Application layer: orchestration on top of the command model.
//!
//! `executor` retries single commands, `dispatch` runs queued envelopes,
//! `history` keeps undo/redo stacks and `ledger` drives bank accounts from
//! parsed operations.

pub mod dispatch;
pub mod executor;
pub mod history;
pub mod ledger;
