//! Ingredient batch and stock aggregate models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::StockKey;

/// Raw ingredient reference data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: Uuid,
    pub name: String,
    /// Unit of measure used when none is given on receipt
    pub default_unit: String,
}

/// A priced receipt of one ingredient.
///
/// `balance` only ever moves down through consumption, or back up to
/// `received_quantity` through reversal. `receipt_seq` is assigned by the
/// store on insert and orders batches for FIFO depletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundBatch {
    pub id: Uuid,
    pub ingredient_id: Uuid,
    pub unit: String,
    pub unit_price: Decimal,
    pub received_quantity: Decimal,
    pub balance: Decimal,
    /// Payment to the supplier has been settled
    pub settled: bool,
    pub received_at: DateTime<Utc>,
    pub receipt_seq: i64,
}

impl InboundBatch {
    pub fn stock_key(&self) -> StockKey {
        StockKey::new(self.ingredient_id, self.unit.clone(), self.unit_price)
    }

    /// Quantity taken out of this batch so far
    pub fn consumed(&self) -> Decimal {
        self.received_quantity - self.balance
    }

    /// Nothing has been taken from the batch yet
    pub fn is_untouched(&self) -> bool {
        self.balance == self.received_quantity
    }

    pub fn is_depleted(&self) -> bool {
        self.balance <= Decimal::ZERO
    }
}

/// Cached total of batch balances sharing one [`StockKey`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockAggregate {
    pub ingredient_id: Uuid,
    pub unit: String,
    pub unit_price: Decimal,
    pub quantity: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Sum aggregate quantities, e.g. across all prices of one ingredient and unit
pub fn total_quantity<'a>(aggregates: impl IntoIterator<Item = &'a StockAggregate>) -> Decimal {
    aggregates.into_iter().map(|a| a.quantity).sum()
}
