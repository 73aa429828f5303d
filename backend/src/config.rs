//! Configuration management for the inventory ledger
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with LEDGER_ prefix

use std::time::Duration;

use config::{ConfigError, Environment, File};
use ledger_shared::{validate_page_size, ShortfallPolicy, DEFAULT_PAGE_SIZE};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Health endpoint listener
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Depletion behaviour
    pub ledger: LedgerConfig,

    /// Timeout sweep schedule
    pub scheduler: SchedulerConfig,

    /// Log output
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// How long to wait for a pooled connection
    pub acquire_timeout_secs: u64,

    /// Upper bound on any single statement inside a unit of work
    pub statement_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Batches fetched per page while depleting
    pub depletion_page_size: u32,

    /// What to do when batches run out mid-depletion
    pub shortfall_policy: ShortfallPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Run the production timeout sweep in this process
    pub enabled: bool,

    /// Seconds between sweeps
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("LEDGER_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.statement_timeout_ms", 5000)?
            .set_default("ledger.depletion_page_size", i64::from(DEFAULT_PAGE_SIZE))?
            .set_default("ledger.shortfall_policy", ShortfallPolicy::Reject.as_str())?
            .set_default("scheduler.enabled", true)?
            .set_default("scheduler.sweep_interval_secs", 60)?
            .set_default("logging.json", false)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (LEDGER_ prefix)
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.ledger.validate()?;
        Ok(config)
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

impl LedgerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_page_size(self.depletion_page_size)
            .map_err(|msg| ConfigError::Message(format!("ledger.depletion_page_size: {}", msg)))
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            depletion_page_size: DEFAULT_PAGE_SIZE,
            shortfall_policy: ShortfallPolicy::Reject,
        }
    }
}

impl SchedulerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
