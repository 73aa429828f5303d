//! Periodic production timeout sweep

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::services::ProductionService;

/// Spawn the sweep loop. It runs until the returned handle is aborted.
pub fn spawn_timeout_sweep(service: ProductionService, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("Production timeout sweep running every {:?}", every);

        loop {
            ticker.tick().await;

            match service.run_timeout_sweep(Utc::now()).await {
                Ok(ids) if ids.is_empty() => tracing::debug!("Timeout sweep found no overdue runs"),
                Ok(ids) => tracing::info!("Timeout sweep timed out {} production runs", ids.len()),
                Err(e) => tracing::error!("Timeout sweep failed: {}", e),
            }
        }
    })
}
