//! PostgreSQL storage for Flare.
//!
//! Triggers are stored as JSONB documents with the columns the engine
//! queries by pulled out next to them. Idempotency keys live in their own
//! table and rely on `INSERT ... ON CONFLICT` for create-once semantics.

pub mod repositories;

pub use repositories::*;

use flare_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    20
}

fn default_acquire_timeout() -> u64 {
    5
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect with default pool settings.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(&DatabaseConfig::new(database_url)).await
    }

    pub async fn connect_with(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn triggers(&self) -> PgTriggerStore {
        PgTriggerStore::new(self.pool.clone())
    }

    pub fn idempotency(&self) -> PgIdempotencyStore {
        PgIdempotencyStore::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: DatabaseConfig =
            serde_yaml::from_str("url: postgres://flare@localhost/flare\n").unwrap();
        assert_eq!(config, DatabaseConfig::new("postgres://flare@localhost/flare"));
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.with_max_connections(4).max_connections, 4);
    }
}
