//! Throwaway PostgreSQL and NATS servers for integration tests.

use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::{nats::Nats, postgres::Postgres};

const POSTGRES_TAG: &str = "16-alpine";
const NATS_TAG: &str = "2.10-alpine";
const DATABASE: &str = "cinder";

/// PostgreSQL with an empty `cinder` database.
pub struct PostgresContainer {
    // Stops the server when dropped.
    _container: ContainerAsync<Postgres>,
    connection_string: String,
}

impl PostgresContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = Postgres::default()
            .with_db_name(DATABASE)
            .with_user(DATABASE)
            .with_password(DATABASE)
            .with_tag(POSTGRES_TAG)
            .start()
            .await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;

        Ok(Self {
            _container: container,
            connection_string: format!("postgres://{DATABASE}:{DATABASE}@{host}:{port}/{DATABASE}"),
        })
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

/// NATS with JetStream enabled, so the scheduler's event stream can be created.
pub struct NatsContainer {
    // Stops the server when dropped.
    _container: ContainerAsync<Nats>,
    url: String,
}

impl NatsContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = Nats::default()
            .with_tag(NATS_TAG)
            .with_cmd(["-js"])
            .start()
            .await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(4222).await?;

        Ok(Self {
            _container: container,
            url: format!("nats://{host}:{port}"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
