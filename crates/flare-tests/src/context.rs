//! Test context backed by a PostgreSQL container.

use crate::containers::PostgresContainer;
use flare_db::{Database, DatabaseConfig};

/// Drop this to stop the container.
pub struct TestContext {
    pub postgres: PostgresContainer,
    pub db: Database,
}

impl TestContext {
    /// Start PostgreSQL and apply migrations.
    pub async fn postgres_only() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let postgres = PostgresContainer::start().await?;
        let config = DatabaseConfig::new(postgres.connection_string()).with_max_connections(32);
        let db = Database::connect_with(&config).await?;
        db.migrate().await?;

        Ok(Self { postgres, db })
    }

    pub fn db_url(&self) -> &str {
        self.postgres.connection_string()
    }
}
