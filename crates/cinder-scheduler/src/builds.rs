//! Job lifecycle operations with their resource and pipeline side effects.

use chrono::Utc;
use cinder_core::ids::JobId;
use cinder_core::job::{FailureReason, Job, JobEvent};
use cinder_core::ports::JobRepository;
use cinder_core::{Error, Result};
use std::sync::Arc;
use tracing::info;

use crate::processing::PipelineProcessor;
use crate::resource_groups::ResourceGroupService;
use crate::transitions::JobTransitions;

/// Entry point for runners and the sweeper to finish, cancel or retry jobs.
///
/// A job leaving `running` gives its resource back, which passes it to the
/// next waiter. A job that finishes without ever holding the resource only
/// leaves the wait list. Every finished job advances its pipeline.
#[derive(Clone)]
pub struct BuildService {
    jobs: Arc<dyn JobRepository>,
    transitions: JobTransitions,
    resource_groups: ResourceGroupService,
    processor: PipelineProcessor,
}

impl BuildService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        transitions: JobTransitions,
        resource_groups: ResourceGroupService,
        processor: PipelineProcessor,
    ) -> Self {
        Self {
            jobs,
            transitions,
            resource_groups,
            processor,
        }
    }

    pub async fn succeed(&self, job_id: JobId) -> Result<Job> {
        self.fire(job_id, JobEvent::Succeed).await
    }

    /// Fail a job with `reason`.
    pub async fn drop_job(&self, job_id: JobId, reason: FailureReason) -> Result<Job> {
        self.fire(job_id, JobEvent::Drop(reason)).await
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<Job> {
        self.fire(job_id, JobEvent::Cancel).await
    }

    /// Create a fresh copy of a finished job and schedule it.
    pub async fn retry(&self, job_id: JobId) -> Result<Job> {
        let job = self.load(job_id).await?;
        let retried = job.retry(Utc::now())?;

        self.jobs.insert(&retried).await?;
        self.resource_groups.register(&retried).await?;
        info!(job_id = %job_id, retry_id = %retried.id, "Retried job");

        self.processor.process(retried.pipeline_id).await?;
        self.load(retried.id).await
    }

    async fn fire(&self, job_id: JobId, event: JobEvent) -> Result<Job> {
        let job = self.load(job_id).await?;
        let (job, transition) = self.transitions.apply(&job, event).await?;

        if let Some(group_id) = job.resource_group_id {
            if transition.releases_resource() {
                self.resource_groups.release_held_by(group_id, job.id).await?;
            } else if transition.to.is_terminal() {
                self.resource_groups.leave(group_id, job.id).await?;
            }
        }

        if transition.to.is_terminal() {
            info!(job_id = %job.id, job = %job.name, status = %job.status, "Job finished");
            self.processor.process(job.pipeline_id).await?;
        }
        Ok(job)
    }

    async fn load(&self, job_id: JobId) -> Result<Job> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }
}
