//! Domain models for the inventory ledger

mod batch;
mod consumption;
mod production;

pub use batch::*;
pub use consumption::*;
pub use production::*;
