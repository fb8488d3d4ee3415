pub mod command;
pub mod envelope;
pub mod ports;
pub mod retry;
pub mod transaction;
