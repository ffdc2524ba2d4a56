//! PostgreSQL implementation of JobRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinder_core::ids::{JobId, PipelineId, ProjectId, ResourceGroupId, RunnerId};
use cinder_core::job::{FailureReason, Job, JobStatus, When};
use cinder_core::ports::JobRepository;
use cinder_core::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;

pub(crate) const JOB_COLUMNS: &str = "id, pipeline_id, project_id, name, stage, stage_idx, status, run_when, resource_group_id, tags, protected, timeout_secs, failure_reason, runner_id, retried_from, created_at, queued_at, started_at, finished_at, lock_version";

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    /// Create a new PgJobRepository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn when_to_str(when: When) -> &'static str {
        match when {
            When::OnSuccess => "on_success",
            When::Manual => "manual",
        }
    }

    fn str_to_when(s: &str) -> When {
        match s {
            "manual" => When::Manual,
            _ => When::OnSuccess,
        }
    }

    pub(crate) fn row_to_job(r: &PgRow) -> Result<Job> {
        let status: String = r.get("status");
        let run_when: String = r.get("run_when");
        let failure_reason = r
            .get::<Option<String>, _>("failure_reason")
            .map(|s| s.parse::<FailureReason>())
            .transpose()?;

        Ok(Job {
            id: JobId::from_uuid(r.get::<uuid::Uuid, _>("id")),
            pipeline_id: PipelineId::from_uuid(r.get::<uuid::Uuid, _>("pipeline_id")),
            project_id: ProjectId::from_uuid(r.get::<uuid::Uuid, _>("project_id")),
            name: r.get("name"),
            stage: r.get("stage"),
            stage_idx: r.get::<i32, _>("stage_idx") as u32,
            status: status.parse::<JobStatus>()?,
            when: Self::str_to_when(&run_when),
            resource_group_id: r
                .get::<Option<uuid::Uuid>, _>("resource_group_id")
                .map(ResourceGroupId::from_uuid),
            tags: r.get("tags"),
            protected: r.get("protected"),
            timeout_secs: r.get::<i64, _>("timeout_secs") as u64,
            failure_reason,
            runner_id: r
                .get::<Option<uuid::Uuid>, _>("runner_id")
                .map(RunnerId::from_uuid),
            retried_from: r
                .get::<Option<uuid::Uuid>, _>("retried_from")
                .map(JobId::from_uuid),
            created_at: r.get("created_at"),
            queued_at: r.get("queued_at"),
            started_at: r.get("started_at"),
            finished_at: r.get("finished_at"),
            lock_version: r.get::<i32, _>("lock_version") as u32,
        })
    }

    /// Insert a job inside an open transaction.
    pub(crate) async fn insert_in(tx: &mut Transaction<'_, Postgres>, job: &Job) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO jobs (id, pipeline_id, project_id, name, stage, stage_idx, status, run_when, resource_group_id, tags, protected, timeout_secs, failure_reason, runner_id, retried_from, created_at, queued_at, started_at, finished_at, lock_version)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)"#,
        )
        .bind(job.id.as_uuid())
        .bind(job.pipeline_id.as_uuid())
        .bind(job.project_id.as_uuid())
        .bind(&job.name)
        .bind(&job.stage)
        .bind(job.stage_idx as i32)
        .bind(job.status.as_str())
        .bind(Self::when_to_str(job.when))
        .bind(job.resource_group_id.map(|id| *id.as_uuid()))
        .bind(&job.tags)
        .bind(job.protected)
        .bind(job.timeout_secs as i64)
        .bind(job.failure_reason.map(|r| r.as_str()))
        .bind(job.runner_id.map(|id| *id.as_uuid()))
        .bind(job.retried_from.map(|id| *id.as_uuid()))
        .bind(job.created_at)
        .bind(job.queued_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.lock_version as i32)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn update(&self, job: &Job) -> Result<Job> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, failure_reason = $3, runner_id = $4, queued_at = $5, started_at = $6, finished_at = $7, lock_version = lock_version + 1 WHERE id = $1 AND lock_version = $8",
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.failure_reason.map(|r| r.as_str()))
        .bind(job.runner_id.map(|id| *id.as_uuid()))
        .bind(job.queued_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.lock_version as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return match self.get(job.id).await? {
                Some(_) => Err(Error::StaleObject(job.id.to_string())),
                None => Err(Error::JobNotFound(job.id.to_string())),
            };
        }

        let mut updated = job.clone();
        updated.lock_version += 1;
        Ok(updated)
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Self::insert_in(&mut tx, job).await?;
        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_by_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE pipeline_id = $1 ORDER BY stage_idx, created_at, id"
        ))
        .bind(pipeline_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn list_runnable(&self, limit: u32) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE (status = 'pending' AND resource_group_id IS NULL)
               OR (status = 'running' AND resource_group_id IS NOT NULL AND runner_id IS NULL)
            ORDER BY created_at, id
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn count_running_by_project(
        &self,
        project_ids: &[ProjectId],
    ) -> Result<HashMap<ProjectId, u64>> {
        let ids: Vec<uuid::Uuid> = project_ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT project_id, COUNT(*) AS running FROM jobs
            WHERE status = 'running' AND runner_id IS NOT NULL AND project_id = ANY($1)
            GROUP BY project_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|r| {
                (
                    ProjectId::from_uuid(r.get::<uuid::Uuid, _>("project_id")),
                    r.get::<i64, _>("running") as u64,
                )
            })
            .collect())
    }

    async fn list_stuck_pending(
        &self,
        now: DateTime<Utc>,
        pending_timeout: chrono::Duration,
        limit: u32,
    ) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' AND queued_at < $1 ORDER BY queued_at, id LIMIT $2"
        ))
        .bind(now - pending_timeout)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn list_timed_out(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = 'running'
              AND started_at + timeout_secs * INTERVAL '1 second' < $1
            ORDER BY started_at, id
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn count_active_by_project(&self, project_id: ProjectId) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS active FROM jobs WHERE project_id = $1 AND status IN ('pending', 'waiting_for_resource', 'running')",
        )
        .bind(project_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.get::<i64, _>("active") as u64)
    }
}
