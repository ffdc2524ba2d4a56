//! PostgreSQL implementation of LeaseStore.

use async_trait::async_trait;
use cinder_core::ports::LeaseStore;
use cinder_core::{Error, Result};
use sqlx::PgPool;
use std::time::Duration;
use tracing::debug;

/// Lease table keyed by name. A lease is taken over once `expires_at` passed.
#[derive(Clone)]
pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    /// Create a new PgLeaseStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let result = sqlx::query(
            r#"INSERT INTO leases (key, owner, expires_at)
               VALUES ($1, $2, NOW() + make_interval(secs => $3))
               ON CONFLICT (key) DO UPDATE
               SET owner = EXCLUDED.owner, expires_at = EXCLUDED.expires_at
               WHERE leases.expires_at <= NOW() OR leases.owner = EXCLUDED.owner"#,
        )
        .bind(key)
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let acquired = result.rows_affected() == 1;
        debug!(lease = %key, owner = %owner, acquired, "Lease attempt");
        Ok(acquired)
    }

    async fn release_lease(&self, key: &str, owner: &str) -> Result<()> {
        sqlx::query("DELETE FROM leases WHERE key = $1 AND owner = $2")
            .bind(key)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
