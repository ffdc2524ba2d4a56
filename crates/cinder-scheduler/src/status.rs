//! Pipeline status bookkeeping.

use chrono::Utc;
use cinder_core::events::{Event, PipelineStatusChangedPayload};
use cinder_core::ids::{JobId, PipelineId};
use cinder_core::job::{Job, JobStatus};
use cinder_core::pipeline::composite_status;
use cinder_core::ports::{EventBus, JobRepository, PipelineRepository};
use cinder_core::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::transitions::publish;

/// Recomputes a pipeline's status from its jobs and announces changes.
#[derive(Clone)]
pub struct PipelineStatusUpdater {
    jobs: Arc<dyn JobRepository>,
    pipelines: Arc<dyn PipelineRepository>,
    events: Arc<dyn EventBus>,
}

impl PipelineStatusUpdater {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        pipelines: Arc<dyn PipelineRepository>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            jobs,
            pipelines,
            events,
        }
    }

    pub async fn refresh(&self, pipeline_id: PipelineId) -> Result<JobStatus> {
        let jobs = latest(self.jobs.list_by_pipeline(pipeline_id).await?);
        let status = composite_status(&jobs);

        let mut pipeline = self
            .pipelines
            .get(pipeline_id)
            .await?
            .ok_or_else(|| Error::PipelineNotFound(pipeline_id.to_string()))?;

        let from = pipeline.status;
        let now = Utc::now();
        if !pipeline.set_status(status, now) {
            return Ok(status);
        }
        self.pipelines.update(&pipeline).await?;

        info!(pipeline_id = %pipeline_id, from = %from, to = %status, "Pipeline status changed");
        publish(
            self.events.as_ref(),
            Event::PipelineStatusChanged(PipelineStatusChangedPayload {
                pipeline_id,
                project_id: pipeline.project_id,
                from,
                to: status,
                changed_at: now,
            }),
        )
        .await;

        Ok(status)
    }
}

/// Drop jobs that were superseded by a retry.
pub(crate) fn latest(jobs: Vec<Job>) -> Vec<Job> {
    let retried: HashSet<JobId> = jobs.iter().filter_map(|job| job.retried_from).collect();
    jobs.into_iter()
        .filter(|job| !retried.contains(&job.id))
        .collect()
}
