//! Production run models and lifecycle

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A finished good and its bill of materials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: Uuid,
    pub name: String,
    pub lines: Vec<RecipeLine>,
}

/// Ingredient needed per unit of finished output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeLine {
    pub ingredient_id: Uuid,
    pub unit: String,
    pub quantity_per_unit: Decimal,
}

/// Lifecycle status of a production run.
///
/// Codes are persisted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionStatus {
    Pending,
    Finished,
    Void,
    TimedOut,
}

/// Transitions a caller can request on a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionAction {
    Finish,
    Void,
    TimeOut,
}

impl std::fmt::Display for ProductionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductionAction::Finish => write!(f, "finish"),
            ProductionAction::Void => write!(f, "void"),
            ProductionAction::TimeOut => write!(f, "time out"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} a production run that is {from}")]
pub struct TransitionError {
    pub from: ProductionStatus,
    pub action: ProductionAction,
}

impl ProductionStatus {
    pub fn code(&self) -> i16 {
        match self {
            ProductionStatus::Pending => 1,
            ProductionStatus::Finished => 2,
            ProductionStatus::Void => 3,
            ProductionStatus::TimedOut => 4,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(ProductionStatus::Pending),
            2 => Some(ProductionStatus::Finished),
            3 => Some(ProductionStatus::Void),
            4 => Some(ProductionStatus::TimedOut),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProductionStatus::Pending)
    }

    /// Apply `action` to this status. Only `Pending` runs move.
    pub fn apply(self, action: ProductionAction) -> Result<ProductionStatus, TransitionError> {
        match (self, action) {
            (ProductionStatus::Pending, ProductionAction::Finish) => Ok(ProductionStatus::Finished),
            (ProductionStatus::Pending, ProductionAction::Void) => Ok(ProductionStatus::Void),
            (ProductionStatus::Pending, ProductionAction::TimeOut) => Ok(ProductionStatus::TimedOut),
            (from, action) => Err(TransitionError { from, action }),
        }
    }
}

impl std::fmt::Display for ProductionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductionStatus::Pending => write!(f, "pending"),
            ProductionStatus::Finished => write!(f, "finished"),
            ProductionStatus::Void => write!(f, "void"),
            ProductionStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

/// One manufacturing attempt of a recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionRun {
    pub id: Uuid,
    pub recipe_id: Uuid,
    pub expected_output: Decimal,
    pub actual_output: Option<Decimal>,
    /// actual / expected, set when the run finishes
    pub yield_ratio: Option<Decimal>,
    pub status: ProductionStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProductionRun {
    /// A pending run whose deadline has passed at `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ProductionStatus::Pending && self.deadline.is_some_and(|d| d < now)
    }
}

/// Customer order reference data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_name: String,
}
