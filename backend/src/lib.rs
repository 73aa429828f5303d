//! Warehouse inventory ledger and cost-accounting engine
//!
//! Tracks raw-ingredient stock as priced batches, depletes them FIFO when
//! production consumes material, and rolls costs up from batch to
//! production run to customer order.

pub mod config;
pub mod db;
pub mod error;
pub mod scheduler;
pub mod services;

pub use config::Config;
pub use db::{InMemoryLedgerStore, LedgerStore, PgLedgerStore, SharedStore, UnitOfWork};
pub use error::{AppResult, LedgerError};
pub use services::Ledger;
