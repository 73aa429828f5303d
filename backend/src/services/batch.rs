//! Batch store: receipts, reversals, voids and settlement of inbound batches

use chrono::{DateTime, Utc};
use ledger_shared::{
    consumption_cost, validate_amount, validate_positive_quantity, validate_reversal,
    validate_unit_code, validate_unit_price, InboundBatch, OperationTag,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::{NewBatch, NewIngredientRecord, SharedStore, UnitOfWork};
use crate::error::{AppResult, LedgerError};
use crate::services::consumption::ensure_ingredient;
use crate::services::stock::StockAggregator;

/// Batch service for receiving and correcting priced stock
#[derive(Clone)]
pub struct BatchService {
    store: SharedStore,
}

/// Input for receiving a batch
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiveBatchInput {
    pub ingredient_id: Uuid,
    /// Falls back to the ingredient's default unit
    pub unit: Option<String>,
    pub unit_price: Decimal,
    pub quantity: Decimal,
    pub received_at: DateTime<Utc>,
}

impl BatchService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Receive a priced batch into stock
    pub async fn receive(&self, input: ReceiveBatchInput) -> AppResult<InboundBatch> {
        validate_positive_quantity(input.quantity)
            .map_err(|msg| LedgerError::invalid_quantity("quantity", msg))?;
        validate_unit_price(input.unit_price)
            .map_err(|msg| LedgerError::invalid_quantity("unit_price", msg))?;

        let mut tx = self.store.begin().await?;

        let ingredient = tx
            .ingredient(input.ingredient_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Ingredient", input.ingredient_id))?;

        let unit = input.unit.unwrap_or(ingredient.default_unit);
        validate_unit_code(&unit).map_err(|msg| LedgerError::invalid_quantity("unit", msg))?;

        let batch = tx
            .insert_batch(NewBatch {
                ingredient_id: ingredient.id,
                unit,
                unit_price: input.unit_price,
                quantity: input.quantity,
                received_at: input.received_at,
            })
            .await?;

        StockAggregator::apply_delta(
            tx.as_mut(),
            &batch.stock_key(),
            batch.received_quantity,
            input.received_at,
        )
        .await?;

        record_movement(
            tx.as_mut(),
            &batch,
            batch.received_quantity,
            OperationTag::InboundReceipt,
            input.received_at,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Received batch {} (seq {}): {} {} of ingredient {} at {}",
            batch.id,
            batch.receipt_seq,
            batch.received_quantity,
            batch.unit,
            batch.ingredient_id,
            batch.unit_price
        );

        Ok(batch)
    }

    /// Adjust a batch balance by `-quantity_delta` after its receipt was edited.
    /// A negative delta puts quantity back.
    pub async fn reverse(
        &self,
        batch_id: Uuid,
        quantity_delta: Decimal,
        at: DateTime<Utc>,
    ) -> AppResult<InboundBatch> {
        let mut tx = self.store.begin().await?;

        let mut batch = lock_batch(tx.as_mut(), batch_id).await?;

        let balance = validate_reversal(batch.balance, batch.received_quantity, quantity_delta)
            .map_err(|msg| {
                if validate_amount(quantity_delta).is_ok() && quantity_delta > batch.balance {
                    LedgerError::NegativeBalance(format!("batch {}: {}", batch_id, msg))
                } else {
                    LedgerError::invalid_quantity("quantity_delta", msg)
                }
            })?;

        tx.set_batch_balance(batch.id, balance).await?;
        StockAggregator::apply_delta(tx.as_mut(), &batch.stock_key(), -quantity_delta, at).await?;
        record_movement(
            tx.as_mut(),
            &batch,
            -quantity_delta,
            OperationTag::ReceiptReversal,
            at,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Reversed {} from batch {}: balance {} -> {}",
            quantity_delta,
            batch.id,
            batch.balance,
            balance
        );

        batch.balance = balance;
        Ok(batch)
    }

    /// Delete a receipt nothing has been taken from
    pub async fn void_receipt(&self, batch_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let mut tx = self.store.begin().await?;

        let batch = lock_batch(tx.as_mut(), batch_id).await?;

        if !batch.is_untouched() {
            return Err(LedgerError::InvalidTransition(format!(
                "batch {} has {} consumed and cannot be voided",
                batch.id,
                batch.consumed()
            )));
        }

        tx.delete_batch(batch.id).await?;
        StockAggregator::apply_delta(
            tx.as_mut(),
            &batch.stock_key(),
            -batch.received_quantity,
            at,
        )
        .await?;
        record_movement(
            tx.as_mut(),
            &batch,
            -batch.received_quantity,
            OperationTag::ReceiptVoid,
            at,
        )
        .await?;

        tx.commit().await?;

        tracing::info!("Voided receipt of batch {}", batch.id);

        Ok(())
    }

    /// Mark the supplier payment for a batch as settled
    pub async fn settle(&self, batch_id: Uuid) -> AppResult<InboundBatch> {
        let mut tx = self.store.begin().await?;

        let mut batch = lock_batch(tx.as_mut(), batch_id).await?;
        if batch.settled {
            return Ok(batch);
        }

        tx.set_batch_settled(batch.id).await?;
        tx.commit().await?;

        tracing::info!("Settled batch {}", batch.id);

        batch.settled = true;
        Ok(batch)
    }

    /// Quantity on hand for `(ingredient, unit)` across all prices
    pub async fn availability(&self, ingredient_id: Uuid, unit: &str) -> AppResult<Decimal> {
        let mut tx = self.store.begin().await?;
        ensure_ingredient(tx.as_mut(), ingredient_id).await?;
        StockAggregator::available(tx.as_mut(), ingredient_id, unit).await
    }

    pub async fn get(&self, batch_id: Uuid) -> AppResult<InboundBatch> {
        let mut tx = self.store.begin().await?;
        tx.batch(batch_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Batch", batch_id))
    }

    /// All batches of `(ingredient, unit)` in receipt order, depleted ones included
    pub async fn list(&self, ingredient_id: Uuid, unit: &str) -> AppResult<Vec<InboundBatch>> {
        let mut tx = self.store.begin().await?;
        ensure_ingredient(tx.as_mut(), ingredient_id).await?;
        tx.batches(ingredient_id, unit).await
    }
}

async fn lock_batch(tx: &mut dyn UnitOfWork, batch_id: Uuid) -> AppResult<InboundBatch> {
    tx.lock_batch(batch_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("Batch", batch_id))
}

async fn record_movement(
    tx: &mut dyn UnitOfWork,
    batch: &InboundBatch,
    quantity: Decimal,
    operation: OperationTag,
    at: DateTime<Utc>,
) -> AppResult<()> {
    tx.insert_ingredient_record(NewIngredientRecord {
        ingredient_id: batch.ingredient_id,
        unit: batch.unit.clone(),
        batch_id: batch.id,
        production_id: None,
        quantity,
        operation,
        cost: consumption_cost(quantity, batch.unit_price)
            .map_err(|msg| LedgerError::invalid_quantity("quantity", msg))?,
        created_at: at,
    })
    .await?;
    Ok(())
}
