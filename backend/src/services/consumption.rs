//! FIFO consumption engine
//!
//! Depletes batches oldest-first to cover a requested quantity and writes one
//! withdrawal record per batch touched. `replenish` is the inverse used when
//! a production run is voided: it books the returned quantity as a fresh
//! batch rather than refilling the originals.

use chrono::{DateTime, Utc};
use ledger_shared::{
    consumption_cost, plan_depletion, validate_page_size, validate_positive_quantity,
    validate_unit_code, validate_unit_price, DepletionCursor, DepletionOutcome, InboundBatch, OperationTag,
    ShortfallPolicy,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::db::{NewBatch, NewIngredientRecord, SharedStore, UnitOfWork};
use crate::error::{AppResult, LedgerError};
use crate::services::stock::StockAggregator;

/// Consumption engine bound to a store and depletion settings
#[derive(Clone)]
pub struct ConsumptionEngine {
    store: SharedStore,
    page_size: u32,
    shortfall_policy: ShortfallPolicy,
}

/// Input for depleting one ingredient
#[derive(Debug, Clone, Deserialize)]
pub struct DepleteInput {
    pub ingredient_id: Uuid,
    pub unit: String,
    pub quantity: Decimal,
    /// Run the withdrawal is charged to, if any
    pub production_id: Option<Uuid>,
    /// Must be a FIFO withdrawal tag, see [`OperationTag::is_fifo_withdrawal`]
    pub operation: OperationTag,
}

/// Input for booking returned stock as a new batch
#[derive(Debug, Clone, Deserialize)]
pub struct ReplenishInput {
    pub ingredient_id: Uuid,
    pub unit: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub production_id: Option<Uuid>,
}

impl ConsumptionEngine {
    /// Fails with a configuration error when the page size is out of range
    pub fn new(store: SharedStore, config: &LedgerConfig) -> AppResult<Self> {
        validate_page_size(config.depletion_page_size).map_err(|msg| {
            LedgerError::Configuration(format!("ledger.depletion_page_size: {}", msg))
        })?;

        Ok(Self {
            store,
            page_size: config.depletion_page_size,
            shortfall_policy: config.shortfall_policy,
        })
    }

    // ========================================================================
    // Standalone operations
    // ========================================================================

    /// Deplete in a unit of work of its own
    pub async fn deplete(&self, input: DepleteInput) -> AppResult<DepletionOutcome> {
        let mut tx = self.store.begin().await?;
        let outcome = self.deplete_in(tx.as_mut(), input, Utc::now()).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Replenish in a unit of work of its own
    pub async fn replenish(&self, input: ReplenishInput) -> AppResult<InboundBatch> {
        let mut tx = self.store.begin().await?;
        let batch = self.replenish_in(tx.as_mut(), input, Utc::now()).await?;
        tx.commit().await?;
        Ok(batch)
    }

    /// What a depletion of `quantity` would take right now, without writing
    pub async fn preview(
        &self,
        ingredient_id: Uuid,
        unit: &str,
        quantity: Decimal,
    ) -> AppResult<DepletionOutcome> {
        validate_positive_quantity(quantity)
            .map_err(|msg| LedgerError::invalid_quantity("quantity", msg))?;

        let mut tx = self.store.begin().await?;
        ensure_ingredient(tx.as_mut(), ingredient_id).await?;
        let batches = tx.batches(ingredient_id, unit).await?;

        Ok(plan_depletion(&batches, quantity))
    }

    // ========================================================================
    // Operations inside a caller's unit of work
    // ========================================================================

    /// Take `input.quantity` from the oldest batches with stock.
    ///
    /// Batches are read a page at a time after the last receipt sequence
    /// seen. Each take is written before the next batch is read. A short page
    /// is not the end: rows locked and drained by a concurrent call drop out
    /// of a page without being replaced, so only an empty page ends the scan.
    /// When the batches run out the shortfall policy decides: `Reject` fails with
    /// `InsufficientStock`, leaving the caller to drop the unit of work;
    /// `AllowPartial` returns the outcome with its shortfall.
    pub async fn deplete_in(
        &self,
        tx: &mut dyn UnitOfWork,
        input: DepleteInput,
        at: DateTime<Utc>,
    ) -> AppResult<DepletionOutcome> {
        validate_positive_quantity(input.quantity)
            .map_err(|msg| LedgerError::invalid_quantity("quantity", msg))?;
        validate_unit_code(&input.unit).map_err(|msg| LedgerError::invalid_quantity("unit", msg))?;
        if !input.operation.is_fifo_withdrawal() {
            return Err(LedgerError::invalid_quantity(
                "operation",
                format!("'{}' does not withdraw stock", input.operation),
            ));
        }
        ensure_ingredient(tx, input.ingredient_id).await?;

        let mut cursor = DepletionCursor::new(input.quantity);

        while !cursor.is_satisfied() {
            let page = tx
                .depletable_batches(
                    input.ingredient_id,
                    &input.unit,
                    cursor.after_seq(),
                    self.page_size,
                )
                .await?;
            if page.is_empty() {
                break;
            }

            for batch in &page {
                let Some(take) = cursor.take(batch) else {
                    break;
                };

                tx.set_batch_balance(take.batch_id, take.balance_after).await?;
                StockAggregator::apply_delta(tx, &batch.stock_key(), -take.quantity, at).await?;
                tx.insert_ingredient_record(NewIngredientRecord {
                    ingredient_id: input.ingredient_id,
                    unit: input.unit.clone(),
                    batch_id: take.batch_id,
                    production_id: input.production_id,
                    quantity: -take.quantity,
                    operation: input.operation,
                    cost: take.cost,
                    created_at: at,
                })
                .await?;

                tracing::debug!(
                    "Took {} {} from batch {} (seq {}) at {}, {} left in batch",
                    take.quantity,
                    input.unit,
                    take.batch_id,
                    take.receipt_seq,
                    take.unit_price,
                    take.balance_after
                );
            }
        }

        let outcome = cursor.finish();

        if !outcome.is_complete() {
            match self.shortfall_policy {
                ShortfallPolicy::Reject => {
                    return Err(LedgerError::InsufficientStock {
                        ingredient_id: input.ingredient_id,
                        unit: input.unit,
                        requested: outcome.requested,
                        shortfall: outcome.shortfall,
                    });
                }
                ShortfallPolicy::AllowPartial => {
                    tracing::warn!(
                        "Partial depletion of ingredient {} ({}): requested {}, short by {}",
                        input.ingredient_id,
                        input.unit,
                        outcome.requested,
                        outcome.shortfall
                    );
                }
            }
        }

        Ok(outcome)
    }

    /// Book `input.quantity` back into stock as a new batch dated `at`
    pub async fn replenish_in(
        &self,
        tx: &mut dyn UnitOfWork,
        input: ReplenishInput,
        at: DateTime<Utc>,
    ) -> AppResult<InboundBatch> {
        validate_positive_quantity(input.quantity)
            .map_err(|msg| LedgerError::invalid_quantity("quantity", msg))?;
        validate_unit_price(input.unit_price)
            .map_err(|msg| LedgerError::invalid_quantity("unit_price", msg))?;
        ensure_ingredient(tx, input.ingredient_id).await?;

        let batch = tx
            .insert_batch(NewBatch {
                ingredient_id: input.ingredient_id,
                unit: input.unit.clone(),
                unit_price: input.unit_price,
                quantity: input.quantity,
                received_at: at,
            })
            .await?;

        StockAggregator::apply_delta(tx, &batch.stock_key(), input.quantity, at).await?;

        tx.insert_ingredient_record(NewIngredientRecord {
            ingredient_id: input.ingredient_id,
            unit: input.unit,
            batch_id: batch.id,
            production_id: input.production_id,
            quantity: input.quantity,
            operation: OperationTag::VoidReversal,
            cost: consumption_cost(input.quantity, input.unit_price)
                .map_err(|msg| LedgerError::invalid_quantity("unit_price", msg))?,
            created_at: at,
        })
        .await?;

        tracing::debug!(
            "Replenished {} {} of ingredient {} at {} as batch {}",
            batch.received_quantity,
            batch.unit,
            batch.ingredient_id,
            batch.unit_price,
            batch.id
        );

        Ok(batch)
    }
}

pub(crate) async fn ensure_ingredient(tx: &mut dyn UnitOfWork, ingredient_id: Uuid) -> AppResult<()> {
    match tx.ingredient(ingredient_id).await? {
        Some(_) => Ok(()),
        None => Err(LedgerError::not_found("Ingredient", ingredient_id)),
    }
}
