//! PostgreSQL implementation of PipelineRepository.

use super::job::PgJobRepository;
use async_trait::async_trait;
use cinder_core::ids::{PipelineId, ProjectId};
use cinder_core::job::{FailureReason, Job, JobStatus};
use cinder_core::pipeline::{Pipeline, PipelineSource};
use cinder_core::ports::PipelineRepository;
use cinder_core::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

/// PostgreSQL implementation of PipelineRepository.
#[derive(Clone)]
pub struct PgPipelineRepository {
    pool: PgPool,
}

impl PgPipelineRepository {
    /// Create a new PgPipelineRepository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn str_to_source(s: &str) -> PipelineSource {
        match s {
            "web" => PipelineSource::Web,
            "trigger" => PipelineSource::Trigger,
            "schedule" => PipelineSource::Schedule,
            "api" => PipelineSource::Api,
            "chat" => PipelineSource::Chat,
            "merge_request_event" => PipelineSource::MergeRequestEvent,
            _ => PipelineSource::Push,
        }
    }

    fn row_to_pipeline(r: &PgRow) -> Result<Pipeline> {
        let status: String = r.get("status");
        let source: String = r.get("source");
        let failure_reason = r
            .get::<Option<String>, _>("failure_reason")
            .map(|s| s.parse::<FailureReason>())
            .transpose()?;

        Ok(Pipeline {
            id: PipelineId::from_uuid(r.get::<uuid::Uuid, _>("id")),
            project_id: ProjectId::from_uuid(r.get::<uuid::Uuid, _>("project_id")),
            git_ref: r.get("ref"),
            sha: r.get("sha"),
            source: Self::str_to_source(&source),
            status: status.parse::<JobStatus>()?,
            failure_reason,
            yaml_errors: r.get("yaml_errors"),
            created_at: r.get("created_at"),
            started_at: r.get("started_at"),
            finished_at: r.get("finished_at"),
        })
    }
}

#[async_trait]
impl PipelineRepository for PgPipelineRepository {
    async fn create(&self, pipeline: &Pipeline, jobs: &[Job]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO pipelines (id, project_id, ref, sha, source, status, failure_reason, yaml_errors, created_at, started_at, finished_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
        )
        .bind(pipeline.id.as_uuid())
        .bind(pipeline.project_id.as_uuid())
        .bind(&pipeline.git_ref)
        .bind(&pipeline.sha)
        .bind(pipeline.source.as_str())
        .bind(pipeline.status.as_str())
        .bind(pipeline.failure_reason.map(|r| r.as_str()))
        .bind(&pipeline.yaml_errors)
        .bind(pipeline.created_at)
        .bind(pipeline.started_at)
        .bind(pipeline.finished_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        for job in jobs {
            PgJobRepository::insert_in(&mut tx, job).await?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        debug!(pipeline_id = %pipeline.id, jobs = jobs.len(), "Stored pipeline");
        Ok(())
    }

    async fn get(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        let row = sqlx::query(
            "SELECT id, project_id, ref, sha, source, status, failure_reason, yaml_errors, created_at, started_at, finished_at FROM pipelines WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_pipeline).transpose()
    }

    async fn update(&self, pipeline: &Pipeline) -> Result<()> {
        let result = sqlx::query(
            "UPDATE pipelines SET status = $2, failure_reason = $3, yaml_errors = $4, started_at = $5, finished_at = $6 WHERE id = $1",
        )
        .bind(pipeline.id.as_uuid())
        .bind(pipeline.status.as_str())
        .bind(pipeline.failure_reason.map(|r| r.as_str()))
        .bind(&pipeline.yaml_errors)
        .bind(pipeline.started_at)
        .bind(pipeline.finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::PipelineNotFound(pipeline.id.to_string()));
        }
        Ok(())
    }
}
