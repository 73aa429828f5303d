//! Production runs: start, finish, void, timeout and order fulfillment
//!
//! ```text
//!             ┌──────────► Finished (2)
//!             │
//! Pending (1) ┼──────────► Void (3)
//!             │
//!             └──────────► TimedOut (4)
//! ```
//!
//! Terminal states never change again. Every transition locks the run row
//! before reading its status, so a run raced by the timeout sweep and a
//! caller ends up in exactly one terminal state.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use ledger_shared::{
    line_requirement, output_share, round_price, validate_non_negative_quantity,
    validate_positive_quantity, validate_recipe_lines, weighted_average_price, yield_ratio,
    FinishedConsumptionRecord, OperationTag, ProductionAction, ProductionRun, ProductionStatus,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::{NewFinishedRecord, NewProductionRun, SharedStore, UnitOfWork};
use crate::error::{AppResult, LedgerError};
use crate::services::consumption::{ConsumptionEngine, DepleteInput, ReplenishInput};
use crate::services::cost::production_cost_in;

/// Production service driving the run lifecycle
#[derive(Clone)]
pub struct ProductionService {
    store: SharedStore,
    engine: ConsumptionEngine,
}

/// Input for starting a production run
#[derive(Debug, Clone, Deserialize)]
pub struct StartProductionInput {
    pub recipe_id: Uuid,
    pub expected_output: Decimal,
    /// Estimated time to completion. Missing or non-positive creates the run
    /// already timed out.
    pub estimated_duration_secs: Option<i64>,
}

/// Input for fulfilling an order from a finished run
#[derive(Debug, Clone, Deserialize)]
pub struct FulfillOrderInput {
    pub order_id: Uuid,
    pub production_id: Uuid,
    pub quantity: Decimal,
}

impl ProductionService {
    pub fn new(store: SharedStore, engine: ConsumptionEngine) -> Self {
        Self { store, engine }
    }

    /// Start a run and withdraw its ingredients
    pub async fn start(&self, input: StartProductionInput) -> AppResult<ProductionRun> {
        validate_positive_quantity(input.expected_output)
            .map_err(|msg| LedgerError::invalid_quantity("expected_output", msg))?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let recipe = tx
            .recipe(input.recipe_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Recipe", input.recipe_id))?;
        validate_recipe_lines(&recipe.lines)
            .map_err(|msg| LedgerError::invalid_quantity("recipe", msg))?;

        let (status, deadline) = match input.estimated_duration_secs {
            Some(secs) if secs > 0 => (ProductionStatus::Pending, Some(now + Duration::seconds(secs))),
            _ => (ProductionStatus::TimedOut, None),
        };

        let run = tx
            .insert_production(NewProductionRun {
                recipe_id: recipe.id,
                expected_output: input.expected_output,
                status,
                deadline,
                created_at: now,
            })
            .await?;

        for line in &recipe.lines {
            self.engine
                .deplete_in(
                    tx.as_mut(),
                    DepleteInput {
                        ingredient_id: line.ingredient_id,
                        unit: line.unit.clone(),
                        quantity: line_requirement(line.quantity_per_unit, input.expected_output)
                            .map_err(|msg| LedgerError::invalid_quantity("expected_output", msg))?,
                        production_id: Some(run.id),
                        operation: OperationTag::ProductionConsumption,
                    },
                    now,
                )
                .await?;
        }

        tx.commit().await?;

        if run.status == ProductionStatus::TimedOut {
            tracing::warn!(
                "Production run {} of recipe {} started without a positive duration and is already timed out",
                run.id,
                recipe.id
            );
        } else {
            tracing::info!(
                "Started production run {} of recipe {}: expecting {} by {:?}",
                run.id,
                recipe.id,
                run.expected_output,
                run.deadline
            );
        }

        Ok(run)
    }

    /// Finish a pending run with its actual output
    pub async fn finish(&self, production_id: Uuid, actual_output: Decimal) -> AppResult<ProductionRun> {
        validate_non_negative_quantity(actual_output)
            .map_err(|msg| LedgerError::invalid_quantity("actual_output", msg))?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let mut run = lock_production(tx.as_mut(), production_id).await?;
        run.status = run.status.apply(ProductionAction::Finish)?;
        run.actual_output = Some(actual_output);
        run.yield_ratio = Some(yield_ratio(actual_output, run.expected_output));
        run.completed_at = Some(now);
        tx.update_production(&run).await?;

        tx.apply_finished_stock_delta(run.recipe_id, actual_output)
            .await?;

        let cost = production_cost_in(tx.as_mut(), run.id).await?;
        tx.insert_finished_record(NewFinishedRecord {
            recipe_id: run.recipe_id,
            production_id: run.id,
            order_id: None,
            quantity: actual_output,
            operation: OperationTag::ProductionCompletion,
            cost,
            created_at: now,
        })
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Finished production run {}: {} of {} expected (yield {:?}), cost {}",
            run.id,
            actual_output,
            run.expected_output,
            run.yield_ratio,
            cost
        );

        Ok(run)
    }

    /// Void a pending run and return its ingredients to stock
    pub async fn void(&self, production_id: Uuid) -> AppResult<ProductionRun> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let mut run = lock_production(tx.as_mut(), production_id).await?;
        run.status = run.status.apply(ProductionAction::Void)?;

        // Group withdrawals per (ingredient, unit), returning each at its weighted average price
        let mut withdrawn: BTreeMap<(Uuid, String), Vec<(Decimal, Decimal)>> = BTreeMap::new();
        for record in tx.ingredient_records_for_production(run.id).await? {
            if record.is_withdrawal() {
                withdrawn
                    .entry((record.ingredient_id, record.unit))
                    .or_default()
                    .push((record.quantity, record.cost));
            }
        }

        for ((ingredient_id, unit), parts) in withdrawn {
            let quantity: Decimal = parts.iter().map(|(q, _)| q.abs()).sum();
            let Some(unit_price) = weighted_average_price(parts) else {
                continue;
            };

            self.engine
                .replenish_in(
                    tx.as_mut(),
                    ReplenishInput {
                        ingredient_id,
                        unit,
                        quantity,
                        unit_price: round_price(unit_price),
                        production_id: Some(run.id),
                    },
                    now,
                )
                .await?;
        }

        run.completed_at = Some(now);
        tx.update_production(&run).await?;

        tx.commit().await?;

        tracing::info!("Voided production run {}", run.id);

        Ok(run)
    }

    /// Consume finished output of a run for an order
    pub async fn fulfill_order(&self, input: FulfillOrderInput) -> AppResult<FinishedConsumptionRecord> {
        validate_positive_quantity(input.quantity)
            .map_err(|msg| LedgerError::invalid_quantity("quantity", msg))?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        tx.order(input.order_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Order", input.order_id))?;

        let run = lock_production(tx.as_mut(), input.production_id).await?;
        if run.status != ProductionStatus::Finished {
            return Err(LedgerError::InvalidTransition(format!(
                "production run {} is {} and has no output to fulfil orders from",
                run.id, run.status
            )));
        }

        let actual_output = run.actual_output.unwrap_or(Decimal::ZERO);
        let fulfilled: Decimal = tx
            .finished_records_for_production(run.id)
            .await?
            .iter()
            .filter(|r| r.operation == OperationTag::OrderFulfillment)
            .map(|r| r.quantity.abs())
            .sum();
        let unfulfilled = actual_output - fulfilled;
        if input.quantity > unfulfilled {
            return Err(LedgerError::invalid_quantity(
                "quantity",
                format!(
                    "production run {} has only {} unfulfilled output",
                    run.id, unfulfilled
                ),
            ));
        }

        let stock = tx
            .apply_finished_stock_delta(run.recipe_id, -input.quantity)
            .await?;
        if stock < Decimal::ZERO {
            return Err(LedgerError::NegativeBalance(format!(
                "finished stock of recipe {} would drop to {}",
                run.recipe_id, stock
            )));
        }

        let production_cost = production_cost_in(tx.as_mut(), run.id).await?;
        let record = tx
            .insert_finished_record(NewFinishedRecord {
                recipe_id: run.recipe_id,
                production_id: run.id,
                order_id: Some(input.order_id),
                quantity: -input.quantity,
                operation: OperationTag::OrderFulfillment,
                cost: output_share(production_cost, input.quantity, actual_output),
                created_at: now,
            })
            .await?;

        tx.commit().await?;

        tracing::info!(
            "Fulfilled {} of production run {} for order {}",
            input.quantity,
            run.id,
            input.order_id
        );

        Ok(record)
    }

    pub async fn get(&self, production_id: Uuid) -> AppResult<ProductionRun> {
        let mut tx = self.store.begin().await?;
        tx.production(production_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Production run", production_id))
    }

    /// Pending runs whose deadline has passed at `now`
    pub async fn list_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
        let mut tx = self.store.begin().await?;
        tx.overdue_productions(now).await
    }

    /// Force every overdue pending run to `TimedOut`, without touching stock.
    ///
    /// Each run is re-checked under its row lock in a unit of work of its
    /// own. A run that reached a terminal state in the meantime is skipped.
    /// Returns the ids actually transitioned.
    pub async fn run_timeout_sweep(&self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
        let candidates = self.list_overdue(now).await?;
        let mut timed_out = Vec::with_capacity(candidates.len());

        for production_id in candidates {
            let mut tx = self.store.begin().await?;

            let Some(mut run) = tx.lock_production(production_id).await? else {
                continue;
            };
            if !run.is_overdue(now) {
                tracing::warn!(
                    "Skipping timeout of production run {}: it is {}",
                    production_id,
                    run.status
                );
                continue;
            }

            run.status = run.status.apply(ProductionAction::TimeOut)?;
            tx.update_production(&run).await?;
            tx.commit().await?;

            tracing::warn!(
                "Production run {} passed its deadline {:?} and timed out",
                run.id,
                run.deadline
            );
            timed_out.push(run.id);
        }

        Ok(timed_out)
    }
}

async fn lock_production(tx: &mut dyn UnitOfWork, production_id: Uuid) -> AppResult<ProductionRun> {
    tx.lock_production(production_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("Production run", production_id))
}
