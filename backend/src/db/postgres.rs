//! PostgreSQL ledger store
//!
//! A unit of work is one `sqlx` transaction. Row locks are taken with
//! `SELECT ... FOR UPDATE`; every transaction carries a local
//! `statement_timeout` so a blocked lock wait surfaces as a timeout.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_shared::{
    FinishedConsumptionRecord, InboundBatch, Ingredient, IngredientConsumptionRecord,
    OperationTag, Order, ProductionRun, ProductionStatus, Recipe, RecipeLine, StockAggregate,
    StockKey,
};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    LedgerStore, NewBatch, NewFinishedRecord, NewIngredientRecord, NewProductionRun, UnitOfWork,
};
use crate::error::{AppResult, LedgerError};

const BATCH_COLUMNS: &str = "id, ingredient_id, unit, unit_price, received_quantity, balance, \
                             settled, received_at, receipt_seq";

const INGREDIENT_RECORD_COLUMNS: &str = "id, ingredient_id, unit, batch_id, production_id, \
                                         quantity, operation, cost, created_at";

const FINISHED_RECORD_COLUMNS: &str = "id, recipe_id, production_id, order_id, quantity, \
                                       operation, cost, created_at";

const PRODUCTION_COLUMNS: &str = "id, recipe_id, expected_output, actual_output, yield_ratio, \
                                  status, deadline, created_at, completed_at";

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct BatchRow {
    id: Uuid,
    ingredient_id: Uuid,
    unit: String,
    unit_price: Decimal,
    received_quantity: Decimal,
    balance: Decimal,
    settled: bool,
    received_at: DateTime<Utc>,
    receipt_seq: i64,
}

impl From<BatchRow> for InboundBatch {
    fn from(row: BatchRow) -> Self {
        Self {
            id: row.id,
            ingredient_id: row.ingredient_id,
            unit: row.unit,
            unit_price: row.unit_price,
            received_quantity: row.received_quantity,
            balance: row.balance,
            settled: row.settled,
            received_at: row.received_at,
            receipt_seq: row.receipt_seq,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StockAggregateRow {
    ingredient_id: Uuid,
    unit: String,
    unit_price: Decimal,
    quantity: Decimal,
    updated_at: DateTime<Utc>,
}

impl From<StockAggregateRow> for StockAggregate {
    fn from(row: StockAggregateRow) -> Self {
        Self {
            ingredient_id: row.ingredient_id,
            unit: row.unit,
            unit_price: row.unit_price,
            quantity: row.quantity,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct IngredientRecordRow {
    id: Uuid,
    ingredient_id: Uuid,
    unit: String,
    batch_id: Uuid,
    production_id: Option<Uuid>,
    quantity: Decimal,
    operation: String,
    cost: Decimal,
    created_at: DateTime<Utc>,
}

impl TryFrom<IngredientRecordRow> for IngredientConsumptionRecord {
    type Error = LedgerError;

    fn try_from(row: IngredientRecordRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            ingredient_id: row.ingredient_id,
            unit: row.unit,
            batch_id: row.batch_id,
            production_id: row.production_id,
            quantity: row.quantity,
            operation: parse_operation(&row.operation)?,
            cost: row.cost,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FinishedRecordRow {
    id: Uuid,
    recipe_id: Uuid,
    production_id: Uuid,
    order_id: Option<Uuid>,
    quantity: Decimal,
    operation: String,
    cost: Decimal,
    created_at: DateTime<Utc>,
}

impl TryFrom<FinishedRecordRow> for FinishedConsumptionRecord {
    type Error = LedgerError;

    fn try_from(row: FinishedRecordRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            recipe_id: row.recipe_id,
            production_id: row.production_id,
            order_id: row.order_id,
            quantity: row.quantity,
            operation: parse_operation(&row.operation)?,
            cost: row.cost,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductionRow {
    id: Uuid,
    recipe_id: Uuid,
    expected_output: Decimal,
    actual_output: Option<Decimal>,
    yield_ratio: Option<Decimal>,
    status: i16,
    deadline: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProductionRow> for ProductionRun {
    type Error = LedgerError;

    fn try_from(row: ProductionRow) -> Result<Self, Self::Error> {
        let status = ProductionStatus::from_code(row.status).ok_or_else(|| {
            LedgerError::Internal(format!(
                "production run {} has unknown status code {}",
                row.id, row.status
            ))
        })?;
        Ok(Self {
            id: row.id,
            recipe_id: row.recipe_id,
            expected_output: row.expected_output,
            actual_output: row.actual_output,
            yield_ratio: row.yield_ratio,
            status,
            deadline: row.deadline,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RecipeLineRow {
    ingredient_id: Uuid,
    unit: String,
    quantity_per_unit: Decimal,
}

impl From<RecipeLineRow> for RecipeLine {
    fn from(row: RecipeLineRow) -> Self {
        Self {
            ingredient_id: row.ingredient_id,
            unit: row.unit,
            quantity_per_unit: row.quantity_per_unit,
        }
    }
}

fn expect_one(rows_affected: u64, entity: &'static str, id: Uuid) -> AppResult<()> {
    if rows_affected == 0 {
        return Err(LedgerError::not_found(entity, id));
    }
    Ok(())
}

fn parse_operation(tag: &str) -> AppResult<OperationTag> {
    OperationTag::from_str(tag)
        .ok_or_else(|| LedgerError::Internal(format!("unknown operation tag '{}'", tag)))
}

// =============================================================================
// Store
// =============================================================================

/// Ledger store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(format!("{}ms", self.statement_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    async fn fetch_batch(&mut self, id: Uuid, for_update: bool) -> AppResult<Option<InboundBatch>> {
        let lock = if for_update { " FOR UPDATE" } else { "" };
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {} FROM inbound_batches WHERE id = $1{}",
            BATCH_COLUMNS, lock
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn fetch_production(
        &mut self,
        id: Uuid,
        for_update: bool,
    ) -> AppResult<Option<ProductionRun>> {
        let lock = if for_update { " FOR UPDATE" } else { "" };
        let row = sqlx::query_as::<_, ProductionRow>(&format!(
            "SELECT {} FROM production_runs WHERE id = $1{}",
            PRODUCTION_COLUMNS, lock
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(TryInto::try_into).transpose()
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn ingredient(&mut self, id: Uuid) -> AppResult<Option<Ingredient>> {
        let row = sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT id, name, default_unit FROM ingredients WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|(id, name, default_unit)| Ingredient {
            id,
            name,
            default_unit,
        }))
    }

    async fn recipe(&mut self, id: Uuid) -> AppResult<Option<Recipe>> {
        let name = sqlx::query_scalar::<_, String>("SELECT name FROM recipes WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        let Some(name) = name else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, RecipeLineRow>(
            r#"
            SELECT ingredient_id, unit, quantity_per_unit
            FROM recipe_lines
            WHERE recipe_id = $1
            ORDER BY position
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(Some(Recipe {
            id,
            name,
            lines: lines.into_iter().map(Into::into).collect(),
        }))
    }

    async fn order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, customer_name FROM orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|(id, customer_name)| Order { id, customer_name }))
    }

    async fn insert_batch(&mut self, batch: NewBatch) -> AppResult<InboundBatch> {
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            r#"
            INSERT INTO inbound_batches (
                id, ingredient_id, unit, unit_price, received_quantity, balance, received_at
            )
            VALUES ($1, $2, $3, $4, $5, $5, $6)
            RETURNING {}
            "#,
            BATCH_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(batch.ingredient_id)
        .bind(&batch.unit)
        .bind(batch.unit_price)
        .bind(batch.quantity)
        .bind(batch.received_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.into())
    }

    async fn batch(&mut self, id: Uuid) -> AppResult<Option<InboundBatch>> {
        self.fetch_batch(id, false).await
    }

    async fn lock_batch(&mut self, id: Uuid) -> AppResult<Option<InboundBatch>> {
        self.fetch_batch(id, true).await
    }

    async fn depletable_batches(
        &mut self,
        ingredient_id: Uuid,
        unit: &str,
        after_seq: Option<i64>,
        limit: u32,
    ) -> AppResult<Vec<InboundBatch>> {
        let rows = sqlx::query_as::<_, BatchRow>(&format!(
            r#"
            SELECT {}
            FROM inbound_batches
            WHERE ingredient_id = $1
              AND unit = $2
              AND balance > 0
              AND ($3::BIGINT IS NULL OR receipt_seq > $3)
            ORDER BY receipt_seq
            LIMIT $4
            FOR UPDATE
            "#,
            BATCH_COLUMNS
        ))
        .bind(ingredient_id)
        .bind(unit)
        .bind(after_seq)
        .bind(i64::from(limit))
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn batches(&mut self, ingredient_id: Uuid, unit: &str) -> AppResult<Vec<InboundBatch>> {
        let rows = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {} FROM inbound_batches WHERE ingredient_id = $1 AND unit = $2 ORDER BY receipt_seq",
            BATCH_COLUMNS
        ))
        .bind(ingredient_id)
        .bind(unit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_batch_balance(&mut self, id: Uuid, balance: Decimal) -> AppResult<()> {
        let result = sqlx::query("UPDATE inbound_batches SET balance = $1 WHERE id = $2")
            .bind(balance)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        expect_one(result.rows_affected(), "Batch", id)
    }

    async fn set_batch_settled(&mut self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("UPDATE inbound_batches SET settled = true WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        expect_one(result.rows_affected(), "Batch", id)
    }

    async fn delete_batch(&mut self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM inbound_batches WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        expect_one(result.rows_affected(), "Batch", id)
    }

    async fn apply_stock_delta(
        &mut self,
        key: &StockKey,
        delta: Decimal,
        at: DateTime<Utc>,
    ) -> AppResult<Decimal> {
        let quantity = sqlx::query_scalar::<_, Decimal>(
            r#"
            INSERT INTO stock_aggregates (ingredient_id, unit, unit_price, quantity, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (ingredient_id, unit, unit_price) DO UPDATE
            SET quantity = stock_aggregates.quantity + EXCLUDED.quantity,
                updated_at = EXCLUDED.updated_at
            RETURNING quantity
            "#,
        )
        .bind(key.ingredient_id)
        .bind(&key.unit)
        .bind(key.unit_price)
        .bind(delta)
        .bind(at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(quantity)
    }

    async fn delete_stock_aggregate(&mut self, key: &StockKey) -> AppResult<()> {
        sqlx::query(
            "DELETE FROM stock_aggregates WHERE ingredient_id = $1 AND unit = $2 AND unit_price = $3",
        )
        .bind(key.ingredient_id)
        .bind(&key.unit)
        .bind(key.unit_price)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn stock_aggregates(
        &mut self,
        ingredient_id: Uuid,
        unit: &str,
    ) -> AppResult<Vec<StockAggregate>> {
        let rows = sqlx::query_as::<_, StockAggregateRow>(
            r#"
            SELECT ingredient_id, unit, unit_price, quantity, updated_at
            FROM stock_aggregates
            WHERE ingredient_id = $1 AND unit = $2
            ORDER BY unit_price
            "#,
        )
        .bind(ingredient_id)
        .bind(unit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_ingredient_record(
        &mut self,
        record: NewIngredientRecord,
    ) -> AppResult<IngredientConsumptionRecord> {
        let row = sqlx::query_as::<_, IngredientRecordRow>(&format!(
            r#"
            INSERT INTO ingredient_consumption_records (
                id, ingredient_id, unit, batch_id, production_id,
                quantity, operation, cost, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            INGREDIENT_RECORD_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(record.ingredient_id)
        .bind(&record.unit)
        .bind(record.batch_id)
        .bind(record.production_id)
        .bind(record.quantity)
        .bind(record.operation.as_str())
        .bind(record.cost)
        .bind(record.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        row.try_into()
    }

    async fn ingredient_record(
        &mut self,
        id: Uuid,
    ) -> AppResult<Option<IngredientConsumptionRecord>> {
        let row = sqlx::query_as::<_, IngredientRecordRow>(&format!(
            "SELECT {} FROM ingredient_consumption_records WHERE id = $1",
            INGREDIENT_RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn ingredient_records_for_production(
        &mut self,
        production_id: Uuid,
    ) -> AppResult<Vec<IngredientConsumptionRecord>> {
        let rows = sqlx::query_as::<_, IngredientRecordRow>(&format!(
            r#"
            SELECT {}
            FROM ingredient_consumption_records
            WHERE production_id = $1
            ORDER BY record_seq
            "#,
            INGREDIENT_RECORD_COLUMNS
        ))
        .bind(production_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_finished_record(
        &mut self,
        record: NewFinishedRecord,
    ) -> AppResult<FinishedConsumptionRecord> {
        let row = sqlx::query_as::<_, FinishedRecordRow>(&format!(
            r#"
            INSERT INTO finished_consumption_records (
                id, recipe_id, production_id, order_id, quantity, operation, cost, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            FINISHED_RECORD_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(record.recipe_id)
        .bind(record.production_id)
        .bind(record.order_id)
        .bind(record.quantity)
        .bind(record.operation.as_str())
        .bind(record.cost)
        .bind(record.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        row.try_into()
    }

    async fn finished_records_for_order(
        &mut self,
        order_id: Uuid,
    ) -> AppResult<Vec<FinishedConsumptionRecord>> {
        let rows = sqlx::query_as::<_, FinishedRecordRow>(&format!(
            "SELECT {} FROM finished_consumption_records WHERE order_id = $1 ORDER BY record_seq",
            FINISHED_RECORD_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn finished_records_for_production(
        &mut self,
        production_id: Uuid,
    ) -> AppResult<Vec<FinishedConsumptionRecord>> {
        let rows = sqlx::query_as::<_, FinishedRecordRow>(&format!(
            "SELECT {} FROM finished_consumption_records WHERE production_id = $1 ORDER BY record_seq",
            FINISHED_RECORD_COLUMNS
        ))
        .bind(production_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_production(&mut self, run: NewProductionRun) -> AppResult<ProductionRun> {
        let row = sqlx::query_as::<_, ProductionRow>(&format!(
            r#"
            INSERT INTO production_runs (id, recipe_id, expected_output, status, deadline, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            PRODUCTION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(run.recipe_id)
        .bind(run.expected_output)
        .bind(run.status.code())
        .bind(run.deadline)
        .bind(run.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        row.try_into()
    }

    async fn production(&mut self, id: Uuid) -> AppResult<Option<ProductionRun>> {
        self.fetch_production(id, false).await
    }

    async fn lock_production(&mut self, id: Uuid) -> AppResult<Option<ProductionRun>> {
        self.fetch_production(id, true).await
    }

    async fn update_production(&mut self, run: &ProductionRun) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE production_runs
            SET status = $1, actual_output = $2, yield_ratio = $3, completed_at = $4
            WHERE id = $5
            "#,
        )
        .bind(run.status.code())
        .bind(run.actual_output)
        .bind(run.yield_ratio)
        .bind(run.completed_at)
        .bind(run.id)
        .execute(&mut *self.tx)
        .await?;

        expect_one(result.rows_affected(), "Production run", run.id)
    }

    async fn overdue_productions(&mut self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM production_runs
            WHERE status = $1 AND deadline < $2
            ORDER BY deadline
            "#,
        )
        .bind(ProductionStatus::Pending.code())
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(ids)
    }

    async fn apply_finished_stock_delta(
        &mut self,
        recipe_id: Uuid,
        delta: Decimal,
    ) -> AppResult<Decimal> {
        let quantity = sqlx::query_scalar::<_, Decimal>(
            r#"
            INSERT INTO finished_good_stock (recipe_id, quantity)
            VALUES ($1, $2)
            ON CONFLICT (recipe_id) DO UPDATE
            SET quantity = finished_good_stock.quantity + EXCLUDED.quantity,
                updated_at = NOW()
            RETURNING quantity
            "#,
        )
        .bind(recipe_id)
        .bind(delta)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(quantity)
    }

    async fn finished_stock(&mut self, recipe_id: Uuid) -> AppResult<Decimal> {
        let quantity = sqlx::query_scalar::<_, Decimal>(
            "SELECT quantity FROM finished_good_stock WHERE recipe_id = $1",
        )
        .bind(recipe_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(quantity.unwrap_or(Decimal::ZERO))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
