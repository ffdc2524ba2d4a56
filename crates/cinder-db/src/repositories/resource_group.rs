//! PostgreSQL implementation of ResourceGroupRepository.
//!
//! The holder column is the mutual-exclusion slot: acquiring is a
//! conditional update on `holder_job_id IS NULL`, so concurrent schedulers
//! race on a single row and exactly one wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinder_core::ids::{JobId, PipelineId, ProjectId, ResourceGroupId};
use cinder_core::ports::ResourceGroupRepository;
use cinder_core::resource_group::{ProcessMode, ResourceGroup, WaitEntry};
use cinder_core::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const GROUP_COLUMNS: &str =
    "id, project_id, key, process_mode, description, holder_job_id, acquired_at, created_at";

/// PostgreSQL implementation of ResourceGroupRepository.
#[derive(Clone)]
pub struct PgResourceGroupRepository {
    pool: PgPool,
}

impl PgResourceGroupRepository {
    /// Create a new PgResourceGroupRepository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_group(r: &PgRow) -> Result<ResourceGroup> {
        let mode: String = r.get("process_mode");

        Ok(ResourceGroup {
            id: ResourceGroupId::from_uuid(r.get::<uuid::Uuid, _>("id")),
            project_id: ProjectId::from_uuid(r.get::<uuid::Uuid, _>("project_id")),
            key: r.get("key"),
            process_mode: mode.parse::<ProcessMode>()?,
            description: r.get("description"),
            holder: r
                .get::<Option<uuid::Uuid>, _>("holder_job_id")
                .map(JobId::from_uuid),
            acquired_at: r.get("acquired_at"),
            created_at: r.get("created_at"),
        })
    }

    fn row_to_entry(r: &PgRow) -> WaitEntry {
        WaitEntry {
            job_id: JobId::from_uuid(r.get::<uuid::Uuid, _>("job_id")),
            pipeline_id: PipelineId::from_uuid(r.get::<uuid::Uuid, _>("pipeline_id")),
            enqueued_at: r.get("enqueued_at"),
            sequence: r.get::<i64, _>("sequence") as u64,
        }
    }
}

#[async_trait]
impl ResourceGroupRepository for PgResourceGroupRepository {
    async fn find_or_create(&self, project_id: ProjectId, key: &str) -> Result<ResourceGroup> {
        let candidate = ResourceGroup::new(project_id, key, Utc::now());

        sqlx::query(
            "INSERT INTO resource_groups (id, project_id, key, process_mode, created_at) VALUES ($1, $2, $3, $4, $5) ON CONFLICT (project_id, key) DO NOTHING",
        )
        .bind(candidate.id.as_uuid())
        .bind(project_id.as_uuid())
        .bind(key)
        .bind(candidate.process_mode.as_str())
        .bind(candidate.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let row = sqlx::query(&format!(
            "SELECT {GROUP_COLUMNS} FROM resource_groups WHERE project_id = $1 AND key = $2"
        ))
        .bind(project_id.as_uuid())
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Self::row_to_group(&row)
    }

    async fn get(&self, id: ResourceGroupId) -> Result<Option<ResourceGroup>> {
        let row = sqlx::query(&format!(
            "SELECT {GROUP_COLUMNS} FROM resource_groups WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_group).transpose()
    }

    async fn set_process_mode(&self, id: ResourceGroupId, mode: ProcessMode) -> Result<()> {
        let result = sqlx::query("UPDATE resource_groups SET process_mode = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(mode.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::ResourceGroupNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_with_waiting(&self) -> Result<Vec<ResourceGroup>> {
        let rows = sqlx::query(&format!(
            "SELECT {GROUP_COLUMNS} FROM resource_groups g WHERE EXISTS (SELECT 1 FROM resource_group_wait_entries w WHERE w.resource_group_id = g.id) ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_group).collect()
    }

    async fn enqueue(
        &self,
        id: ResourceGroupId,
        job_id: JobId,
        pipeline_id: PipelineId,
        at: DateTime<Utc>,
    ) -> Result<WaitEntry> {
        sqlx::query(
            "INSERT INTO resource_group_wait_entries (resource_group_id, job_id, pipeline_id, enqueued_at) VALUES ($1, $2, $3, $4) ON CONFLICT (resource_group_id, job_id) DO NOTHING",
        )
        .bind(id.as_uuid())
        .bind(job_id.as_uuid())
        .bind(pipeline_id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let row = sqlx::query(
            "SELECT job_id, pipeline_id, enqueued_at, sequence FROM resource_group_wait_entries WHERE resource_group_id = $1 AND job_id = $2",
        )
        .bind(id.as_uuid())
        .bind(job_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Self::row_to_entry(&row))
    }

    async fn remove(&self, id: ResourceGroupId, job_id: JobId) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM resource_group_wait_entries WHERE resource_group_id = $1 AND job_id = $2",
        )
        .bind(id.as_uuid())
        .bind(job_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn wait_list(&self, id: ResourceGroupId) -> Result<Vec<WaitEntry>> {
        let rows = sqlx::query(
            "SELECT job_id, pipeline_id, enqueued_at, sequence FROM resource_group_wait_entries WHERE resource_group_id = $1 ORDER BY sequence",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows.iter().map(Self::row_to_entry).collect())
    }

    async fn try_acquire(
        &self,
        id: ResourceGroupId,
        job_id: JobId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE resource_groups SET holder_job_id = $2, acquired_at = $3 WHERE id = $1 AND holder_job_id IS NULL",
        )
        .bind(id.as_uuid())
        .bind(job_id.as_uuid())
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            "DELETE FROM resource_group_wait_entries WHERE resource_group_id = $1 AND job_id = $2",
        )
        .bind(id.as_uuid())
        .bind(job_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(true)
    }

    async fn release(&self, id: ResourceGroupId) -> Result<Option<JobId>> {
        let row = sqlx::query(
            r#"WITH previous AS (
                   SELECT id, holder_job_id FROM resource_groups WHERE id = $1 FOR UPDATE
               )
               UPDATE resource_groups g SET holder_job_id = NULL, acquired_at = NULL
               FROM previous WHERE g.id = previous.id
               RETURNING previous.holder_job_id"#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let row = row.ok_or_else(|| Error::ResourceGroupNotFound(id.to_string()))?;
        Ok(row
            .get::<Option<uuid::Uuid>, _>("holder_job_id")
            .map(JobId::from_uuid))
    }

    async fn release_held_by(&self, id: ResourceGroupId, job_id: JobId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE resource_groups SET holder_job_id = NULL, acquired_at = NULL WHERE id = $1 AND holder_job_id = $2",
        )
        .bind(id.as_uuid())
        .bind(job_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
