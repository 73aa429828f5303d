//! Consumption records: the immutable movement journal of the ledger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a stock movement happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationTag {
    InboundReceipt,
    ReceiptReversal,
    ReceiptVoid,
    ProductionConsumption,
    VoidReversal,
    ProductionCompletion,
    OrderFulfillment,
}

impl OperationTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationTag::InboundReceipt => "inbound receipt",
            OperationTag::ReceiptReversal => "receipt reversal",
            OperationTag::ReceiptVoid => "receipt void",
            OperationTag::ProductionConsumption => "production consumption",
            OperationTag::VoidReversal => "void reversal",
            OperationTag::ProductionCompletion => "production completion",
            OperationTag::OrderFulfillment => "order fulfillment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "inbound receipt" => Some(OperationTag::InboundReceipt),
            "receipt reversal" => Some(OperationTag::ReceiptReversal),
            "receipt void" => Some(OperationTag::ReceiptVoid),
            "production consumption" => Some(OperationTag::ProductionConsumption),
            "void reversal" => Some(OperationTag::VoidReversal),
            "production completion" => Some(OperationTag::ProductionCompletion),
            "order fulfillment" => Some(OperationTag::OrderFulfillment),
            _ => None,
        }
    }

    /// Tags a FIFO depletion may book its withdrawals under
    pub fn is_fifo_withdrawal(&self) -> bool {
        matches!(self, OperationTag::ProductionConsumption)
    }
}

impl std::fmt::Display for OperationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Movement of a raw ingredient against one batch.
///
/// `quantity` is signed: positive adds stock, negative withdraws it.
/// `cost` is always the magnitude `|quantity| × unit price`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngredientConsumptionRecord {
    pub id: Uuid,
    pub ingredient_id: Uuid,
    pub unit: String,
    pub batch_id: Uuid,
    pub production_id: Option<Uuid>,
    pub quantity: Decimal,
    pub operation: OperationTag,
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}

impl IngredientConsumptionRecord {
    pub fn is_withdrawal(&self) -> bool {
        self.quantity < Decimal::ZERO
    }
}

/// Movement of finished goods produced by a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedConsumptionRecord {
    pub id: Uuid,
    pub recipe_id: Uuid,
    pub production_id: Uuid,
    pub order_id: Option<Uuid>,
    pub quantity: Decimal,
    pub operation: OperationTag,
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}
