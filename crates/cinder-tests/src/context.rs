//! Scheduler contexts backed by containerized services.

use crate::containers::{NatsContainer, PostgresContainer};
use cinder_core::ports::EventBus;
use cinder_db::Database;
use cinder_nats::{LocalEventBus, NatsEventBus};
use cinder_scheduler::{Scheduler, SchedulerConfig, Stores};
use std::sync::Arc;

/// PostgreSQL stores and the NATS bus, as a production deployment wires them.
///
/// Drop this to stop all containers.
pub struct TestContext {
    pub postgres: PostgresContainer,
    pub nats: NatsContainer,
    pub db: Database,
    pub event_bus: Arc<NatsEventBus>,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let (postgres, nats) = tokio::try_join!(PostgresContainer::start(), NatsContainer::start())?;
        let db = connect_schema(&postgres).await?;
        let event_bus = Arc::new(NatsEventBus::connect(nats.url()).await?);

        Ok(Self {
            postgres,
            nats,
            db,
            event_bus,
        })
    }

    /// Create context with only PostgreSQL.
    pub async fn postgres_only() -> anyhow::Result<PostgresOnlyContext> {
        crate::init_test_logging();

        let postgres = PostgresContainer::start().await?;
        let db = connect_schema(&postgres).await?;

        Ok(PostgresOnlyContext { postgres, db })
    }

    /// Create context with only NATS.
    pub async fn nats_only() -> anyhow::Result<NatsOnlyContext> {
        crate::init_test_logging();

        let nats = NatsContainer::start().await?;
        let event_bus = NatsEventBus::connect(nats.url()).await?;

        Ok(NatsOnlyContext { nats, event_bus })
    }

    pub fn stores(&self) -> Stores {
        Stores::postgres(&self.db)
    }

    /// A scheduler publishing to JetStream.
    pub fn scheduler(&self, config: &SchedulerConfig) -> anyhow::Result<Scheduler> {
        let events: Arc<dyn EventBus> = self.event_bus.clone();
        Ok(Scheduler::new(self.stores(), events, config)?)
    }
}

/// PostgreSQL stores with the in-process bus.
pub struct PostgresOnlyContext {
    pub postgres: PostgresContainer,
    pub db: Database,
}

impl PostgresOnlyContext {
    pub fn stores(&self) -> Stores {
        Stores::postgres(&self.db)
    }

    pub fn scheduler(&self, config: &SchedulerConfig) -> anyhow::Result<Scheduler> {
        Ok(Scheduler::new(
            self.stores(),
            Arc::new(LocalEventBus::new()),
            config,
        )?)
    }
}

/// Minimal context with only NATS.
pub struct NatsOnlyContext {
    pub nats: NatsContainer,
    pub event_bus: NatsEventBus,
}

async fn connect_schema(postgres: &PostgresContainer) -> anyhow::Result<Database> {
    let db = Database::connect(postgres.connection_string()).await?;
    db.ensure_schema().await?;
    Ok(db)
}
