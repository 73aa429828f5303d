//! In-memory ledger store
//!
//! The whole ledger lives behind one async mutex. A unit of work holds the
//! lock for its lifetime and edits a private copy of the state; commit
//! swaps the copy in, drop discards it. Units of work are therefore fully
//! serialized, which stands in for row locking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_shared::{
    FinishedConsumptionRecord, InboundBatch, Ingredient, IngredientConsumptionRecord, Order,
    ProductionRun, ProductionStatus, Recipe, RecipeLine, StockAggregate, StockKey,
};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    LedgerStore, NewBatch, NewFinishedRecord, NewIngredientRecord, NewProductionRun, UnitOfWork,
};
use crate::error::{AppResult, LedgerError};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
struct LedgerState {
    ingredients: HashMap<Uuid, Ingredient>,
    recipes: HashMap<Uuid, Recipe>,
    orders: HashMap<Uuid, Order>,
    batches: HashMap<Uuid, InboundBatch>,
    aggregates: HashMap<StockKey, StockAggregate>,
    ingredient_records: Vec<IngredientConsumptionRecord>,
    finished_records: Vec<FinishedConsumptionRecord>,
    productions: HashMap<Uuid, ProductionRun>,
    finished_stock: HashMap<Uuid, Decimal>,
    last_receipt_seq: i64,
}

impl LedgerState {
    fn batches_of(&self, ingredient_id: Uuid, unit: &str) -> Vec<InboundBatch> {
        let mut batches: Vec<InboundBatch> = self
            .batches
            .values()
            .filter(|b| b.ingredient_id == ingredient_id && b.unit == unit)
            .cloned()
            .collect();
        batches.sort_by_key(|b| b.receipt_seq);
        batches
    }

    fn batch_mut(&mut self, id: Uuid) -> AppResult<&mut InboundBatch> {
        self.batches
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found("Batch", id))
    }
}

fn checked_total(current: Decimal, delta: Decimal) -> AppResult<Decimal> {
    current.checked_add(delta).ok_or_else(|| {
        LedgerError::invalid_quantity("quantity", "Total exceeds the representable range")
    })
}

/// Ledger store backed by process memory
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    lock_timeout: Duration,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Store whose `begin` gives up after `lock_timeout` waiting for the
    /// current unit of work to finish
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            lock_timeout,
        }
    }

    // ------------------------------------------------------------------
    // Reference data seeding. Master data is owned by systems outside the
    // ledger; these stand in for them.
    // ------------------------------------------------------------------

    pub async fn add_ingredient(&self, name: &str, default_unit: &str) -> Ingredient {
        let ingredient = Ingredient {
            id: Uuid::new_v4(),
            name: name.to_string(),
            default_unit: default_unit.to_string(),
        };
        self.state
            .lock()
            .await
            .ingredients
            .insert(ingredient.id, ingredient.clone());
        ingredient
    }

    pub async fn add_recipe(&self, name: &str, lines: Vec<RecipeLine>) -> Recipe {
        let recipe = Recipe {
            id: Uuid::new_v4(),
            name: name.to_string(),
            lines,
        };
        self.state
            .lock()
            .await
            .recipes
            .insert(recipe.id, recipe.clone());
        recipe
    }

    pub async fn add_order(&self, customer_name: &str) -> Order {
        let order = Order {
            id: Uuid::new_v4(),
            customer_name: customer_name.to_string(),
        };
        self.state.lock().await.orders.insert(order.id, order.clone());
        order
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        let guard = tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| {
                LedgerError::Timeout(format!(
                    "ledger lock not acquired within {:?}",
                    self.lock_timeout
                ))
            })?;
        let working = (*guard).clone();
        Ok(Box::new(InMemoryUnitOfWork { guard, working }))
    }
}

struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn ingredient(&mut self, id: Uuid) -> AppResult<Option<Ingredient>> {
        Ok(self.working.ingredients.get(&id).cloned())
    }

    async fn recipe(&mut self, id: Uuid) -> AppResult<Option<Recipe>> {
        Ok(self.working.recipes.get(&id).cloned())
    }

    async fn order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn insert_batch(&mut self, batch: NewBatch) -> AppResult<InboundBatch> {
        self.working.last_receipt_seq += 1;
        let batch = InboundBatch {
            id: Uuid::new_v4(),
            ingredient_id: batch.ingredient_id,
            unit: batch.unit,
            unit_price: batch.unit_price,
            received_quantity: batch.quantity,
            balance: batch.quantity,
            settled: false,
            received_at: batch.received_at,
            receipt_seq: self.working.last_receipt_seq,
        };
        self.working.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn batch(&mut self, id: Uuid) -> AppResult<Option<InboundBatch>> {
        Ok(self.working.batches.get(&id).cloned())
    }

    async fn lock_batch(&mut self, id: Uuid) -> AppResult<Option<InboundBatch>> {
        self.batch(id).await
    }

    async fn depletable_batches(
        &mut self,
        ingredient_id: Uuid,
        unit: &str,
        after_seq: Option<i64>,
        limit: u32,
    ) -> AppResult<Vec<InboundBatch>> {
        Ok(self
            .working
            .batches_of(ingredient_id, unit)
            .into_iter()
            .filter(|b| b.balance > Decimal::ZERO)
            .filter(|b| after_seq.map_or(true, |seq| b.receipt_seq > seq))
            .take(limit as usize)
            .collect())
    }

    async fn batches(&mut self, ingredient_id: Uuid, unit: &str) -> AppResult<Vec<InboundBatch>> {
        Ok(self.working.batches_of(ingredient_id, unit))
    }

    async fn set_batch_balance(&mut self, id: Uuid, balance: Decimal) -> AppResult<()> {
        self.working.batch_mut(id)?.balance = balance;
        Ok(())
    }

    async fn set_batch_settled(&mut self, id: Uuid) -> AppResult<()> {
        self.working.batch_mut(id)?.settled = true;
        Ok(())
    }

    async fn delete_batch(&mut self, id: Uuid) -> AppResult<()> {
        self.working
            .batches
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| LedgerError::not_found("Batch", id))
    }

    async fn apply_stock_delta(
        &mut self,
        key: &StockKey,
        delta: Decimal,
        at: DateTime<Utc>,
    ) -> AppResult<Decimal> {
        let aggregate = self
            .working
            .aggregates
            .entry(key.clone())
            .or_insert_with(|| StockAggregate {
                ingredient_id: key.ingredient_id,
                unit: key.unit.clone(),
                unit_price: key.unit_price,
                quantity: Decimal::ZERO,
                updated_at: at,
            });
        aggregate.quantity = checked_total(aggregate.quantity, delta)?;
        aggregate.updated_at = at;
        Ok(aggregate.quantity)
    }

    async fn delete_stock_aggregate(&mut self, key: &StockKey) -> AppResult<()> {
        self.working.aggregates.remove(key);
        Ok(())
    }

    async fn stock_aggregates(
        &mut self,
        ingredient_id: Uuid,
        unit: &str,
    ) -> AppResult<Vec<StockAggregate>> {
        let mut aggregates: Vec<StockAggregate> = self
            .working
            .aggregates
            .values()
            .filter(|a| a.ingredient_id == ingredient_id && a.unit == unit)
            .cloned()
            .collect();
        aggregates.sort_by_key(|a| a.unit_price);
        Ok(aggregates)
    }

    async fn insert_ingredient_record(
        &mut self,
        record: NewIngredientRecord,
    ) -> AppResult<IngredientConsumptionRecord> {
        let record = IngredientConsumptionRecord {
            id: Uuid::new_v4(),
            ingredient_id: record.ingredient_id,
            unit: record.unit,
            batch_id: record.batch_id,
            production_id: record.production_id,
            quantity: record.quantity,
            operation: record.operation,
            cost: record.cost,
            created_at: record.created_at,
        };
        self.working.ingredient_records.push(record.clone());
        Ok(record)
    }

    async fn ingredient_record(
        &mut self,
        id: Uuid,
    ) -> AppResult<Option<IngredientConsumptionRecord>> {
        Ok(self
            .working
            .ingredient_records
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn ingredient_records_for_production(
        &mut self,
        production_id: Uuid,
    ) -> AppResult<Vec<IngredientConsumptionRecord>> {
        Ok(self
            .working
            .ingredient_records
            .iter()
            .filter(|r| r.production_id == Some(production_id))
            .cloned()
            .collect())
    }

    async fn insert_finished_record(
        &mut self,
        record: NewFinishedRecord,
    ) -> AppResult<FinishedConsumptionRecord> {
        let record = FinishedConsumptionRecord {
            id: Uuid::new_v4(),
            recipe_id: record.recipe_id,
            production_id: record.production_id,
            order_id: record.order_id,
            quantity: record.quantity,
            operation: record.operation,
            cost: record.cost,
            created_at: record.created_at,
        };
        self.working.finished_records.push(record.clone());
        Ok(record)
    }

    async fn finished_records_for_order(
        &mut self,
        order_id: Uuid,
    ) -> AppResult<Vec<FinishedConsumptionRecord>> {
        Ok(self
            .working
            .finished_records
            .iter()
            .filter(|r| r.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    async fn finished_records_for_production(
        &mut self,
        production_id: Uuid,
    ) -> AppResult<Vec<FinishedConsumptionRecord>> {
        Ok(self
            .working
            .finished_records
            .iter()
            .filter(|r| r.production_id == production_id)
            .cloned()
            .collect())
    }

    async fn insert_production(&mut self, run: NewProductionRun) -> AppResult<ProductionRun> {
        let run = ProductionRun {
            id: Uuid::new_v4(),
            recipe_id: run.recipe_id,
            expected_output: run.expected_output,
            actual_output: None,
            yield_ratio: None,
            status: run.status,
            deadline: run.deadline,
            created_at: run.created_at,
            completed_at: None,
        };
        self.working.productions.insert(run.id, run.clone());
        Ok(run)
    }

    async fn production(&mut self, id: Uuid) -> AppResult<Option<ProductionRun>> {
        Ok(self.working.productions.get(&id).cloned())
    }

    async fn lock_production(&mut self, id: Uuid) -> AppResult<Option<ProductionRun>> {
        self.production(id).await
    }

    async fn update_production(&mut self, run: &ProductionRun) -> AppResult<()> {
        let stored = self
            .working
            .productions
            .get_mut(&run.id)
            .ok_or_else(|| LedgerError::not_found("Production run", run.id))?;
        stored.status = run.status;
        stored.actual_output = run.actual_output;
        stored.yield_ratio = run.yield_ratio;
        stored.completed_at = run.completed_at;
        Ok(())
    }

    async fn overdue_productions(&mut self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
        let mut overdue: Vec<&ProductionRun> = self
            .working
            .productions
            .values()
            .filter(|run| run.status == ProductionStatus::Pending && run.is_overdue(now))
            .collect();
        overdue.sort_by_key(|run| run.deadline);
        Ok(overdue.into_iter().map(|run| run.id).collect())
    }

    async fn apply_finished_stock_delta(
        &mut self,
        recipe_id: Uuid,
        delta: Decimal,
    ) -> AppResult<Decimal> {
        let quantity = self
            .working
            .finished_stock
            .entry(recipe_id)
            .or_insert(Decimal::ZERO);
        *quantity = checked_total(*quantity, delta)?;
        Ok(*quantity)
    }

    async fn finished_stock(&mut self, recipe_id: Uuid) -> AppResult<Decimal> {
        Ok(self
            .working
            .finished_stock
            .get(&recipe_id)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let InMemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_batch(ingredient_id: Uuid, quantity: i64) -> NewBatch {
        NewBatch {
            ingredient_id,
            unit: "kg".to_string(),
            unit_price: Decimal::from(2),
            quantity: Decimal::from(quantity),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commit_persists_changes() {
        let store = InMemoryLedgerStore::new();
        let flour = store.add_ingredient("flour", "kg").await;

        let mut tx = store.begin().await.unwrap();
        let batch = tx.insert_batch(new_batch(flour.id, 5)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.batch(batch.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let store = InMemoryLedgerStore::new();
        let flour = store.add_ingredient("flour", "kg").await;

        let batch_id = {
            let mut tx = store.begin().await.unwrap();
            tx.insert_batch(new_batch(flour.id, 5)).await.unwrap().id
        };

        let mut tx = store.begin().await.unwrap();
        assert!(tx.batch(batch_id).await.unwrap().is_none());
        assert!(tx.batches(flour.id, "kg").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_receipt_sequence_is_monotonic() {
        let store = InMemoryLedgerStore::new();
        let flour = store.add_ingredient("flour", "kg").await;

        let mut tx = store.begin().await.unwrap();
        let first = tx.insert_batch(new_batch(flour.id, 1)).await.unwrap();
        let second = tx.insert_batch(new_batch(flour.id, 1)).await.unwrap();
        assert!(second.receipt_seq > first.receipt_seq);
    }

    #[tokio::test]
    async fn test_depletable_batches_pages_after_cursor() {
        let store = InMemoryLedgerStore::new();
        let flour = store.add_ingredient("flour", "kg").await;

        let mut tx = store.begin().await.unwrap();
        let mut seqs = Vec::new();
        for _ in 0..5 {
            seqs.push(tx.insert_batch(new_batch(flour.id, 1)).await.unwrap().receipt_seq);
        }
        let empty = tx.insert_batch(new_batch(flour.id, 1)).await.unwrap();
        tx.set_batch_balance(empty.id, Decimal::ZERO).await.unwrap();

        let page = tx
            .depletable_batches(flour.id, "kg", None, 2)
            .await
            .unwrap();
        assert_eq!(
            page.iter().map(|b| b.receipt_seq).collect::<Vec<_>>(),
            seqs[..2].to_vec()
        );

        let rest = tx
            .depletable_batches(flour.id, "kg", Some(seqs[1]), 10)
            .await
            .unwrap();
        assert_eq!(
            rest.iter().map(|b| b.receipt_seq).collect::<Vec<_>>(),
            seqs[2..].to_vec()
        );
    }

    #[tokio::test]
    async fn test_stock_delta_overflow_is_an_error() {
        let store = InMemoryLedgerStore::new();
        let flour = store.add_ingredient("flour", "kg").await;
        let key = StockKey::new(flour.id, "kg", Decimal::from(2));

        let mut tx = store.begin().await.unwrap();
        tx.apply_stock_delta(&key, Decimal::MAX, Utc::now())
            .await
            .unwrap();
        let err = tx
            .apply_stock_delta(&key, Decimal::MAX, Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::InvalidQuantity { .. }));
    }

    #[tokio::test]
    async fn test_begin_times_out_while_another_unit_is_open() {
        let store = InMemoryLedgerStore::with_lock_timeout(Duration::from_millis(20));
        let _held = store.begin().await.unwrap();

        let err = store.begin().await.err().unwrap();
        assert!(matches!(err, LedgerError::Timeout(_)));
    }
}
