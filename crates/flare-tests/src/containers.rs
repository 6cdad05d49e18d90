//! PostgreSQL testcontainer.

use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

const DATABASE: &str = "flare";
const USER: &str = "flare";
const PASSWORD: &str = "flare";

/// A throwaway `flare` database; stopped when dropped.
pub struct PostgresContainer {
    _container: ContainerAsync<Postgres>,
    connection_string: String,
}

impl PostgresContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = Postgres::default()
            .with_db_name(DATABASE)
            .with_user(USER)
            .with_password(PASSWORD)
            .with_tag("16-alpine")
            .start()
            .await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;

        Ok(Self {
            _container: container,
            connection_string: format!("postgres://{USER}:{PASSWORD}@{host}:{port}/{DATABASE}"),
        })
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}
