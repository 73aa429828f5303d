//! Common types used across the ledger

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a stock aggregate: one running total per
/// (ingredient, unit of measure, unit price) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub ingredient_id: Uuid,
    pub unit: String,
    pub unit_price: Decimal,
}

impl StockKey {
    pub fn new(ingredient_id: Uuid, unit: impl Into<String>, unit_price: Decimal) -> Self {
        Self {
            ingredient_id,
            unit: unit.into(),
            unit_price,
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.ingredient_id, self.unit, self.unit_price)
    }
}

/// What depletion does when the eligible batches run out before the
/// requested quantity is covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallPolicy {
    /// Fail with insufficient stock and roll back every write of the call.
    #[default]
    Reject,
    /// Succeed with what was available and report the shortfall.
    AllowPartial,
}

impl ShortfallPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShortfallPolicy::Reject => "reject",
            ShortfallPolicy::AllowPartial => "allow_partial",
        }
    }
}
