//! Persistence for the ledger
//!
//! Services never hold a connection. They ask a [`LedgerStore`] for a
//! [`UnitOfWork`], do all their reads and writes through it, and call
//! [`UnitOfWork::commit`] as the last step. A unit of work that is dropped
//! without commit rolls back, whatever the exit path: `?`, an early
//! return, a panic, or a cancelled future.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_shared::{
    FinishedConsumptionRecord, InboundBatch, Ingredient, IngredientConsumptionRecord,
    OperationTag, Order, ProductionRun, ProductionStatus, Recipe, StockAggregate, StockKey,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::AppResult;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Store handle shared by all services
pub type SharedStore = Arc<dyn LedgerStore>;

/// Input for inserting a batch; the store assigns id and receipt sequence
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub ingredient_id: Uuid,
    pub unit: String,
    pub unit_price: Decimal,
    pub quantity: Decimal,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewIngredientRecord {
    pub ingredient_id: Uuid,
    pub unit: String,
    pub batch_id: Uuid,
    pub production_id: Option<Uuid>,
    pub quantity: Decimal,
    pub operation: OperationTag,
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFinishedRecord {
    pub recipe_id: Uuid,
    pub production_id: Uuid,
    pub order_id: Option<Uuid>,
    pub quantity: Decimal,
    pub operation: OperationTag,
    pub cost: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProductionRun {
    pub recipe_id: Uuid,
    pub expected_output: Decimal,
    pub status: ProductionStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Factory for units of work
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a unit of work. Fails with a timeout error when the store
    /// cannot hand one out within its configured bound.
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>>;
}

/// One transaction against the ledger tables.
///
/// `lock_*` and `depletable_batches` take row locks held until the unit of
/// work ends, so concurrent writers to the same rows serialize.
#[async_trait]
pub trait UnitOfWork: Send {
    // ------------------------------------------------------------------
    // Reference data
    // ------------------------------------------------------------------

    async fn ingredient(&mut self, id: Uuid) -> AppResult<Option<Ingredient>>;

    async fn recipe(&mut self, id: Uuid) -> AppResult<Option<Recipe>>;

    async fn order(&mut self, id: Uuid) -> AppResult<Option<Order>>;

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    async fn insert_batch(&mut self, batch: NewBatch) -> AppResult<InboundBatch>;

    async fn batch(&mut self, id: Uuid) -> AppResult<Option<InboundBatch>>;

    async fn lock_batch(&mut self, id: Uuid) -> AppResult<Option<InboundBatch>>;

    /// Batches of `(ingredient, unit)` with a positive balance and a receipt
    /// sequence after `after_seq`, oldest first, at most `limit` rows
    async fn depletable_batches(
        &mut self,
        ingredient_id: Uuid,
        unit: &str,
        after_seq: Option<i64>,
        limit: u32,
    ) -> AppResult<Vec<InboundBatch>>;

    /// All batches of `(ingredient, unit)` in receipt order
    async fn batches(&mut self, ingredient_id: Uuid, unit: &str) -> AppResult<Vec<InboundBatch>>;

    async fn set_batch_balance(&mut self, id: Uuid, balance: Decimal) -> AppResult<()>;

    async fn set_batch_settled(&mut self, id: Uuid) -> AppResult<()>;

    async fn delete_batch(&mut self, id: Uuid) -> AppResult<()>;

    // ------------------------------------------------------------------
    // Stock aggregates
    // ------------------------------------------------------------------

    /// Add `delta` to the aggregate for `key`, creating it at `delta` if
    /// absent. Returns the new quantity, which may be negative; the caller
    /// decides what that means.
    async fn apply_stock_delta(
        &mut self,
        key: &StockKey,
        delta: Decimal,
        at: DateTime<Utc>,
    ) -> AppResult<Decimal>;

    async fn delete_stock_aggregate(&mut self, key: &StockKey) -> AppResult<()>;

    async fn stock_aggregates(
        &mut self,
        ingredient_id: Uuid,
        unit: &str,
    ) -> AppResult<Vec<StockAggregate>>;

    // ------------------------------------------------------------------
    // Consumption records
    // ------------------------------------------------------------------

    async fn insert_ingredient_record(
        &mut self,
        record: NewIngredientRecord,
    ) -> AppResult<IngredientConsumptionRecord>;

    async fn ingredient_record(&mut self, id: Uuid)
        -> AppResult<Option<IngredientConsumptionRecord>>;

    async fn ingredient_records_for_production(
        &mut self,
        production_id: Uuid,
    ) -> AppResult<Vec<IngredientConsumptionRecord>>;

    async fn insert_finished_record(
        &mut self,
        record: NewFinishedRecord,
    ) -> AppResult<FinishedConsumptionRecord>;

    async fn finished_records_for_order(
        &mut self,
        order_id: Uuid,
    ) -> AppResult<Vec<FinishedConsumptionRecord>>;

    async fn finished_records_for_production(
        &mut self,
        production_id: Uuid,
    ) -> AppResult<Vec<FinishedConsumptionRecord>>;

    // ------------------------------------------------------------------
    // Production runs and finished goods
    // ------------------------------------------------------------------

    async fn insert_production(&mut self, run: NewProductionRun) -> AppResult<ProductionRun>;

    async fn production(&mut self, id: Uuid) -> AppResult<Option<ProductionRun>>;

    async fn lock_production(&mut self, id: Uuid) -> AppResult<Option<ProductionRun>>;

    /// Persist status, outputs and completion time of `run`
    async fn update_production(&mut self, run: &ProductionRun) -> AppResult<()>;

    /// Ids of pending runs whose deadline is before `now`
    async fn overdue_productions(&mut self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>>;

    /// Same contract as [`UnitOfWork::apply_stock_delta`], per recipe
    async fn apply_finished_stock_delta(
        &mut self,
        recipe_id: Uuid,
        delta: Decimal,
    ) -> AppResult<Decimal>;

    async fn finished_stock(&mut self, recipe_id: Uuid) -> AppResult<Decimal>;

    // ------------------------------------------------------------------
    // Finalize
    // ------------------------------------------------------------------

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
