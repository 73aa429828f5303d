//! Cost resolver
//!
//! Read-only walk along the attribution chain: order, finished consumption
//! records, production run, ingredient consumption records, batch.

use std::collections::BTreeMap;

use ledger_shared::{
    consumption_cost, output_share, production_cost_contribution, unit_cost,
    IngredientConsumptionRecord, ProductionRun, ProductionStatus,
};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{SharedStore, UnitOfWork};
use crate::error::{AppResult, LedgerError};

/// Cost resolver for consumption records, production runs and orders
#[derive(Clone)]
pub struct CostResolver {
    store: SharedStore,
}

/// Net use of one ingredient by a production run
#[derive(Debug, Clone, Serialize)]
pub struct IngredientCost {
    pub ingredient_id: Uuid,
    pub unit: String,
    /// Withdrawn minus returned
    pub quantity: Decimal,
    pub cost: Decimal,
}

/// Per-ingredient cost of a production run
#[derive(Debug, Clone, Serialize)]
pub struct ProductionCostBreakdown {
    pub production_id: Uuid,
    pub status: ProductionStatus,
    pub ingredients: Vec<IngredientCost>,
    pub total_cost: Decimal,
    pub actual_output: Option<Decimal>,
    /// Cost per unit of output, once the run has produced something
    pub unit_cost: Option<Decimal>,
}

impl CostResolver {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// `|quantity| × unit price` of the batch the record drew on
    pub async fn cost_of_consumption(&self, record_id: Uuid) -> AppResult<Decimal> {
        let mut tx = self.store.begin().await?;

        let record = tx
            .ingredient_record(record_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Consumption record", record_id))?;

        // A voided receipt's batch is gone; its records keep the cost they were booked at
        let cost = match tx.batch(record.batch_id).await? {
            Some(batch) => consumption_cost(record.quantity, batch.unit_price)
                .map_err(|msg| LedgerError::invalid_quantity("quantity", msg))?,
            None => record.cost,
        };

        Ok(cost)
    }

    /// Net ingredient cost of a production run
    pub async fn cost_of_production(&self, production_id: Uuid) -> AppResult<Decimal> {
        let mut tx = self.store.begin().await?;
        ensure_production(tx.as_mut(), production_id).await?;
        production_cost_in(tx.as_mut(), production_id).await
    }

    /// Share of production cost carried by the finished goods an order consumed
    pub async fn cost_of_order(&self, order_id: Uuid) -> AppResult<Decimal> {
        let mut tx = self.store.begin().await?;

        tx.order(order_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Order", order_id))?;

        let mut consumed_by_run: BTreeMap<Uuid, Decimal> = BTreeMap::new();
        for record in tx.finished_records_for_order(order_id).await? {
            *consumed_by_run.entry(record.production_id).or_default() += record.quantity.abs();
        }

        let mut total = Decimal::ZERO;
        for (production_id, consumed) in consumed_by_run {
            let run = ensure_production(tx.as_mut(), production_id).await?;
            let production_cost = production_cost_in(tx.as_mut(), production_id).await?;
            let actual_output = run.actual_output.unwrap_or(Decimal::ZERO);
            total += output_share(production_cost, consumed, actual_output);
        }

        Ok(total)
    }

    /// Per-ingredient quantities and costs of a production run
    pub async fn breakdown(&self, production_id: Uuid) -> AppResult<ProductionCostBreakdown> {
        let mut tx = self.store.begin().await?;

        let run = ensure_production(tx.as_mut(), production_id).await?;
        let records = tx.ingredient_records_for_production(production_id).await?;

        let mut lines: BTreeMap<(Uuid, String), IngredientCost> = BTreeMap::new();
        for record in &records {
            let line = lines
                .entry((record.ingredient_id, record.unit.clone()))
                .or_insert_with(|| IngredientCost {
                    ingredient_id: record.ingredient_id,
                    unit: record.unit.clone(),
                    quantity: Decimal::ZERO,
                    cost: Decimal::ZERO,
                });
            line.quantity -= record.quantity;
            line.cost += production_cost_contribution(record, record.cost);
        }

        let total_cost = net_cost(&records);
        let unit_cost = match run.status {
            ProductionStatus::Finished => run
                .actual_output
                .and_then(|output| unit_cost(total_cost, output)),
            _ => None,
        };

        Ok(ProductionCostBreakdown {
            production_id,
            status: run.status,
            ingredients: lines.into_values().collect(),
            total_cost,
            actual_output: run.actual_output,
            unit_cost,
        })
    }
}

async fn ensure_production(tx: &mut dyn UnitOfWork, production_id: Uuid) -> AppResult<ProductionRun> {
    tx.production(production_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("Production run", production_id))
}

/// Net cost of a run as seen inside `tx`. Zero for a run with no records.
pub(crate) async fn production_cost_in(
    tx: &mut dyn UnitOfWork,
    production_id: Uuid,
) -> AppResult<Decimal> {
    let records = tx.ingredient_records_for_production(production_id).await?;
    Ok(net_cost(&records))
}

fn net_cost(records: &[IngredientConsumptionRecord]) -> Decimal {
    records
        .iter()
        .map(|r| production_cost_contribution(r, r.cost))
        .sum()
}
