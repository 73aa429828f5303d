//! Shared fixtures for ledger integration tests

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_backend::config::LedgerConfig;
use ledger_backend::db::{NewBatch, NewFinishedRecord, NewIngredientRecord, NewProductionRun};
use ledger_backend::services::batch::ReceiveBatchInput;
use ledger_backend::{AppResult, InMemoryLedgerStore, Ledger, LedgerStore, SharedStore, UnitOfWork};
use ledger_shared::{
    total_quantity, FinishedConsumptionRecord, InboundBatch, Ingredient,
    IngredientConsumptionRecord, Order, ProductionRun, Recipe, RecipeLine, StockAggregate,
    StockKey,
};
use rust_decimal::Decimal;
use uuid::Uuid;

// Helper to create Decimal from string
pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn line(ingredient: &Ingredient, quantity_per_unit: &str) -> RecipeLine {
    RecipeLine {
        ingredient_id: ingredient.id,
        unit: ingredient.default_unit.clone(),
        quantity_per_unit: dec(quantity_per_unit),
    }
}

/// In-memory store with every service wired to it
pub struct Harness {
    pub store: Arc<InMemoryLedgerStore>,
    pub ledger: Ledger,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let shared: SharedStore = store.clone();
        let ledger = Ledger::new(shared, &config).unwrap();
        Self { store, ledger }
    }

    /// Ledger whose store returns at most `rows` batches per depletion
    /// fetch, whatever limit is asked for
    pub fn with_short_pages(config: LedgerConfig, rows: usize) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let shared: SharedStore = Arc::new(ShortPageStore {
            inner: store.clone(),
            rows,
        });
        let ledger = Ledger::new(shared, &config).unwrap();
        Self { store, ledger }
    }

    pub async fn ingredient(&self, name: &str) -> Ingredient {
        self.store.add_ingredient(name, "kg").await
    }

    pub async fn receive(&self, ingredient: &Ingredient, quantity: &str, price: &str) -> InboundBatch {
        self.ledger
            .batches
            .receive(ReceiveBatchInput {
                ingredient_id: ingredient.id,
                unit: None,
                unit_price: dec(price),
                quantity: dec(quantity),
                received_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    pub async fn batches(&self, ingredient: &Ingredient) -> Vec<InboundBatch> {
        self.ledger
            .batches
            .list(ingredient.id, &ingredient.default_unit)
            .await
            .unwrap()
    }

    pub async fn balances(&self, ingredient: &Ingredient) -> Vec<Decimal> {
        self.batches(ingredient)
            .await
            .into_iter()
            .map(|b| b.balance)
            .collect()
    }

    pub async fn batch_total(&self, ingredient: &Ingredient) -> Decimal {
        self.balances(ingredient).await.into_iter().sum()
    }

    pub async fn aggregates(&self, ingredient: &Ingredient) -> Vec<StockAggregate> {
        let mut tx = self.store.begin().await.unwrap();
        tx.stock_aggregates(ingredient.id, &ingredient.default_unit)
            .await
            .unwrap()
    }

    pub async fn aggregate_total(&self, ingredient: &Ingredient) -> Decimal {
        total_quantity(&self.aggregates(ingredient).await)
    }

    /// Σ aggregates == Σ batch balances, and no aggregate sits at zero
    pub async fn assert_conserved(&self, ingredient: &Ingredient) {
        let mut tx = self.store.begin().await.unwrap();
        let aggregates = tx
            .stock_aggregates(ingredient.id, &ingredient.default_unit)
            .await
            .unwrap();
        let batches = tx
            .batches(ingredient.id, &ingredient.default_unit)
            .await
            .unwrap();
        drop(tx);

        assert!(aggregates.iter().all(|a| a.quantity > Decimal::ZERO));
        assert!(batches
            .iter()
            .all(|b| b.balance >= Decimal::ZERO && b.balance <= b.received_quantity));
        assert_eq!(
            total_quantity(&aggregates),
            batches.iter().map(|b| b.balance).sum::<Decimal>()
        );
    }

    pub async fn ingredient_records(&self, production_id: Uuid) -> Vec<IngredientConsumptionRecord> {
        let mut tx = self.store.begin().await.unwrap();
        tx.ingredient_records_for_production(production_id)
            .await
            .unwrap()
    }

    pub async fn finished_records(&self, production_id: Uuid) -> Vec<FinishedConsumptionRecord> {
        let mut tx = self.store.begin().await.unwrap();
        tx.finished_records_for_production(production_id)
            .await
            .unwrap()
    }

    pub async fn finished_stock(&self, recipe_id: Uuid) -> Decimal {
        let mut tx = self.store.begin().await.unwrap();
        tx.finished_stock(recipe_id).await.unwrap()
    }
}

/// Store that truncates every `depletable_batches` page to `rows` entries.
/// A backend may legally return fewer rows than the limit before the last
/// page; this stands in for one that does.
pub struct ShortPageStore {
    inner: Arc<InMemoryLedgerStore>,
    rows: usize,
}

#[async_trait]
impl LedgerStore for ShortPageStore {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(ShortPageUnit {
            inner,
            rows: self.rows,
        }))
    }
}

struct ShortPageUnit {
    inner: Box<dyn UnitOfWork>,
    rows: usize,
}

#[async_trait]
impl UnitOfWork for ShortPageUnit {
    async fn ingredient(&mut self, id: Uuid) -> AppResult<Option<Ingredient>> {
        self.inner.ingredient(id).await
    }

    async fn recipe(&mut self, id: Uuid) -> AppResult<Option<Recipe>> {
        self.inner.recipe(id).await
    }

    async fn order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        self.inner.order(id).await
    }

    async fn insert_batch(&mut self, batch: NewBatch) -> AppResult<InboundBatch> {
        self.inner.insert_batch(batch).await
    }

    async fn batch(&mut self, id: Uuid) -> AppResult<Option<InboundBatch>> {
        self.inner.batch(id).await
    }

    async fn lock_batch(&mut self, id: Uuid) -> AppResult<Option<InboundBatch>> {
        self.inner.lock_batch(id).await
    }

    async fn depletable_batches(
        &mut self,
        ingredient_id: Uuid,
        unit: &str,
        after_seq: Option<i64>,
        limit: u32,
    ) -> AppResult<Vec<InboundBatch>> {
        let mut page = self
            .inner
            .depletable_batches(ingredient_id, unit, after_seq, limit)
            .await?;
        page.truncate(self.rows);
        Ok(page)
    }

    async fn batches(&mut self, ingredient_id: Uuid, unit: &str) -> AppResult<Vec<InboundBatch>> {
        self.inner.batches(ingredient_id, unit).await
    }

    async fn set_batch_balance(&mut self, id: Uuid, balance: Decimal) -> AppResult<()> {
        self.inner.set_batch_balance(id, balance).await
    }

    async fn set_batch_settled(&mut self, id: Uuid) -> AppResult<()> {
        self.inner.set_batch_settled(id).await
    }

    async fn delete_batch(&mut self, id: Uuid) -> AppResult<()> {
        self.inner.delete_batch(id).await
    }

    async fn apply_stock_delta(
        &mut self,
        key: &StockKey,
        delta: Decimal,
        at: DateTime<Utc>,
    ) -> AppResult<Decimal> {
        self.inner.apply_stock_delta(key, delta, at).await
    }

    async fn delete_stock_aggregate(&mut self, key: &StockKey) -> AppResult<()> {
        self.inner.delete_stock_aggregate(key).await
    }

    async fn stock_aggregates(
        &mut self,
        ingredient_id: Uuid,
        unit: &str,
    ) -> AppResult<Vec<StockAggregate>> {
        self.inner.stock_aggregates(ingredient_id, unit).await
    }

    async fn insert_ingredient_record(
        &mut self,
        record: NewIngredientRecord,
    ) -> AppResult<IngredientConsumptionRecord> {
        self.inner.insert_ingredient_record(record).await
    }

    async fn ingredient_record(
        &mut self,
        id: Uuid,
    ) -> AppResult<Option<IngredientConsumptionRecord>> {
        self.inner.ingredient_record(id).await
    }

    async fn ingredient_records_for_production(
        &mut self,
        production_id: Uuid,
    ) -> AppResult<Vec<IngredientConsumptionRecord>> {
        self.inner
            .ingredient_records_for_production(production_id)
            .await
    }

    async fn insert_finished_record(
        &mut self,
        record: NewFinishedRecord,
    ) -> AppResult<FinishedConsumptionRecord> {
        self.inner.insert_finished_record(record).await
    }

    async fn finished_records_for_order(
        &mut self,
        order_id: Uuid,
    ) -> AppResult<Vec<FinishedConsumptionRecord>> {
        self.inner.finished_records_for_order(order_id).await
    }

    async fn finished_records_for_production(
        &mut self,
        production_id: Uuid,
    ) -> AppResult<Vec<FinishedConsumptionRecord>> {
        self.inner
            .finished_records_for_production(production_id)
            .await
    }

    async fn insert_production(&mut self, run: NewProductionRun) -> AppResult<ProductionRun> {
        self.inner.insert_production(run).await
    }

    async fn production(&mut self, id: Uuid) -> AppResult<Option<ProductionRun>> {
        self.inner.production(id).await
    }

    async fn lock_production(&mut self, id: Uuid) -> AppResult<Option<ProductionRun>> {
        self.inner.lock_production(id).await
    }

    async fn update_production(&mut self, run: &ProductionRun) -> AppResult<()> {
        self.inner.update_production(run).await
    }

    async fn overdue_productions(&mut self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
        self.inner.overdue_productions(now).await
    }

    async fn apply_finished_stock_delta(
        &mut self,
        recipe_id: Uuid,
        delta: Decimal,
    ) -> AppResult<Decimal> {
        self.inner.apply_finished_stock_delta(recipe_id, delta).await
    }

    async fn finished_stock(&mut self, recipe_id: Uuid) -> AppResult<Decimal> {
        self.inner.finished_stock(recipe_id).await
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.inner.commit().await
    }
}
