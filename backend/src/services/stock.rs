//! Stock aggregate maintenance
//!
//! Aggregates are a cache of batch balances per (ingredient, unit, price).
//! Every batch mutation goes through [`StockAggregator::apply_delta`] in the
//! same unit of work, so the cache never drifts from the batches.

use chrono::{DateTime, Utc};
use ledger_shared::{total_quantity, StockKey};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::UnitOfWork;
use crate::error::{AppResult, LedgerError};

pub struct StockAggregator;

impl StockAggregator {
    /// Apply `delta` to the aggregate for `key` and return the new quantity.
    ///
    /// A result below zero fails with `NegativeBalance`; a result of exactly
    /// zero removes the aggregate.
    pub async fn apply_delta(
        tx: &mut dyn UnitOfWork,
        key: &StockKey,
        delta: Decimal,
        at: DateTime<Utc>,
    ) -> AppResult<Decimal> {
        let quantity = tx.apply_stock_delta(key, delta, at).await?;

        if quantity < Decimal::ZERO {
            return Err(LedgerError::NegativeBalance(format!(
                "stock {} would drop to {}",
                key, quantity
            )));
        }

        if quantity.is_zero() {
            tx.delete_stock_aggregate(key).await?;
        }

        Ok(quantity)
    }

    /// Quantity on hand for `(ingredient, unit)` across all prices
    pub async fn available(
        tx: &mut dyn UnitOfWork,
        ingredient_id: Uuid,
        unit: &str,
    ) -> AppResult<Decimal> {
        let aggregates = tx.stock_aggregates(ingredient_id, unit).await?;
        Ok(total_quantity(&aggregates))
    }
}
