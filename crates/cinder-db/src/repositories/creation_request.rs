//! PostgreSQL implementation of CreationRequestRepository.

use async_trait::async_trait;
use cinder_core::ids::{CreationRequestId, PipelineId, ProjectId};
use cinder_core::pipeline::{CreationStatus, PipelineCreationRequest};
use cinder_core::ports::CreationRequestRepository;
use cinder_core::{Error, Result};
use sqlx::{PgPool, Row};

/// PostgreSQL implementation of CreationRequestRepository.
#[derive(Clone)]
pub struct PgCreationRequestRepository {
    pool: PgPool,
}

impl PgCreationRequestRepository {
    /// Create a new PgCreationRequestRepository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn status_to_str(status: CreationStatus) -> &'static str {
        match status {
            CreationStatus::Creating => "creating",
            CreationStatus::Succeeded => "succeeded",
            CreationStatus::Failed => "failed",
        }
    }

    fn str_to_status(s: &str) -> CreationStatus {
        match s {
            "succeeded" => CreationStatus::Succeeded,
            "failed" => CreationStatus::Failed,
            _ => CreationStatus::Creating,
        }
    }
}

#[async_trait]
impl CreationRequestRepository for PgCreationRequestRepository {
    async fn create(&self, request: &PipelineCreationRequest) -> Result<()> {
        sqlx::query(
            "INSERT INTO pipeline_creation_requests (id, project_id, status, error, pipeline_id, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(request.id.as_uuid())
        .bind(request.project_id.as_uuid())
        .bind(Self::status_to_str(request.status))
        .bind(&request.error)
        .bind(request.pipeline_id.map(|id| *id.as_uuid()))
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, id: CreationRequestId) -> Result<Option<PipelineCreationRequest>> {
        let row = sqlx::query(
            "SELECT id, project_id, status, error, pipeline_id, created_at, updated_at FROM pipeline_creation_requests WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.map(|r| {
            let status: String = r.get("status");
            PipelineCreationRequest {
                id: CreationRequestId::from_uuid(r.get::<uuid::Uuid, _>("id")),
                project_id: ProjectId::from_uuid(r.get::<uuid::Uuid, _>("project_id")),
                status: Self::str_to_status(&status),
                error: r.get("error"),
                pipeline_id: r
                    .get::<Option<uuid::Uuid>, _>("pipeline_id")
                    .map(PipelineId::from_uuid),
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
            }
        }))
    }

    async fn update(&self, request: &PipelineCreationRequest) -> Result<()> {
        let result = sqlx::query(
            "UPDATE pipeline_creation_requests SET status = $2, error = $3, pipeline_id = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(request.id.as_uuid())
        .bind(Self::status_to_str(request.status))
        .bind(&request.error)
        .bind(request.pipeline_id.map(|id| *id.as_uuid()))
        .bind(request.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::CreationRequestNotFound(request.id.to_string()));
        }
        Ok(())
    }
}
