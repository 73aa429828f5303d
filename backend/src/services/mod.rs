//! Business logic services for the inventory ledger

pub mod batch;
pub mod consumption;
pub mod cost;
pub mod production;
pub mod stock;

pub use batch::BatchService;
pub use consumption::ConsumptionEngine;
pub use cost::CostResolver;
pub use production::ProductionService;
pub use stock::StockAggregator;

use crate::config::LedgerConfig;
use crate::db::SharedStore;
use crate::error::AppResult;

/// All services wired to one store
#[derive(Clone)]
pub struct Ledger {
    pub batches: BatchService,
    pub consumption: ConsumptionEngine,
    pub costs: CostResolver,
    pub production: ProductionService,
}

impl Ledger {
    pub fn new(store: SharedStore, config: &LedgerConfig) -> AppResult<Self> {
        let consumption = ConsumptionEngine::new(store.clone(), config)?;
        Ok(Self {
            batches: BatchService::new(store.clone()),
            costs: CostResolver::new(store.clone()),
            production: ProductionService::new(store, consumption.clone()),
            consumption,
        })
    }
}
