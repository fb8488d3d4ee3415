//! Example receivers and the commands that act on them.

pub mod device;
pub mod editor;
pub mod email;
pub mod ledger;
