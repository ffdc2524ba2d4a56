//! Persistence layer for Cinder.
//!
//! Two adapter families implement the `cinder_core::ports` repositories:
//! [`MemoryStore`] for single-process use and tests, and the PostgreSQL
//! repositories in [`repositories`] for shared deployments.

pub mod memory;
pub mod repositories;

pub use memory::MemoryStore;
pub use repositories::*;

use cinder_core::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

const SCHEMA: &str = include_str!("schema.sql");

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| cinder_core::Error::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the scheduler tables if they do not exist yet.
    ///
    /// Schema evolution is managed outside this crate; this only bootstraps
    /// an empty database.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| cinder_core::Error::Database(e.to_string()))?;
        Ok(())
    }

    pub fn jobs(&self) -> PgJobRepository {
        PgJobRepository::new(self.pool.clone())
    }

    pub fn pipelines(&self) -> PgPipelineRepository {
        PgPipelineRepository::new(self.pool.clone())
    }

    pub fn resource_groups(&self) -> PgResourceGroupRepository {
        PgResourceGroupRepository::new(self.pool.clone())
    }

    pub fn creation_requests(&self) -> PgCreationRequestRepository {
        PgCreationRequestRepository::new(self.pool.clone())
    }

    pub fn leases(&self) -> PgLeaseStore {
        PgLeaseStore::new(self.pool.clone())
    }
}
