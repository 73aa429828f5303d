//! Shared types and algorithms for the warehouse inventory ledger
//!
//! This crate has no I/O. It holds the domain models, the FIFO depletion
//! cursor, the production status machine and cost arithmetic used by the
//! backend services.

pub mod costing;
pub mod depletion;
pub mod models;
pub mod types;
pub mod validation;

pub use costing::*;
pub use depletion::*;
pub use models::*;
pub use types::*;
pub use validation::*;
