//! Inventory Ledger - Backend Server
//!
//! Runs migrations, the production timeout sweep and a health endpoint.
//! Ledger operations are called in-process by the surrounding application.

use std::{net::SocketAddr, sync::Arc};

use axum::{extract::State, routing::get, Json, Router};
use ledger_backend::{
    scheduler, services::Ledger, Config, LedgerError, PgLedgerStore, SharedStore,
};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: PgLedgerStore,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ledger_server=debug,ledger_backend=debug,sqlx=warn".into());
    if config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Inventory Ledger Server");
    tracing::info!("Environment: {}", config.environment);

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&config.database.url)
        .await?;

    tracing::info!("Database connection established");

    // Run migrations in development
    if config.environment == "development" {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    let store = PgLedgerStore::new(db_pool, config.database.statement_timeout());
    let shared: SharedStore = Arc::new(store.clone());
    let ledger = Ledger::new(shared, &config.ledger)?;

    tracing::info!(
        "Depletion page size {}, shortfall policy {}",
        config.ledger.depletion_page_size,
        config.ledger.shortfall_policy.as_str()
    );

    let sweeper = if config.scheduler.enabled {
        Some(scheduler::spawn_timeout_sweep(
            ledger.production.clone(),
            config.scheduler.sweep_interval(),
        ))
    } else {
        tracing::info!("Production timeout sweep disabled");
        None
    };

    let state = AppState {
        store,
        config: Arc::new(config.clone()),
    };

    let app = create_app(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| LedgerError::Configuration(format!("invalid server address: {}", e)))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }

    Ok(())
}

/// Create the router with the health endpoint
fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, LedgerError> {
    sqlx::query("SELECT 1").execute(state.store.pool()).await?;

    Ok(Json(json!({
        "status": "ok",
        "environment": state.config.environment,
        "sweeper": state.config.scheduler.enabled,
    })))
}
