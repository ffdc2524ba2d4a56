//! Runner-facing job queue.

use cinder_core::ids::ProjectId;
use cinder_core::job::{Job, JobEvent, JobStatus};
use cinder_core::ports::JobRepository;
use cinder_core::runner::Runner;
use cinder_core::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::status::PipelineStatusUpdater;
use crate::transitions::JobTransitions;

const DEFAULT_BATCH_SIZE: u32 = 500;

/// Hands runnable jobs to runners.
///
/// Runnable jobs are `pending` jobs without a resource group and granted
/// `running` jobs that no runner has taken yet. Jobs waiting for a resource
/// are never handed out.
#[derive(Clone)]
pub struct RunnerQueue {
    jobs: Arc<dyn JobRepository>,
    transitions: JobTransitions,
    statuses: Option<PipelineStatusUpdater>,
    fair_scheduling: bool,
    batch_size: u32,
}

impl RunnerQueue {
    pub fn new(jobs: Arc<dyn JobRepository>, transitions: JobTransitions) -> Self {
        Self {
            jobs,
            transitions,
            statuses: None,
            fair_scheduling: true,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Order candidates by project load instead of plain age.
    pub fn with_fair_scheduling(mut self, enabled: bool) -> Self {
        self.fair_scheduling = enabled;
        self
    }

    /// Keep pipeline statuses current when a pending job starts running.
    pub fn with_status_updates(mut self, statuses: PipelineStatusUpdater) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Assign the next matching job to `runner`.
    pub async fn next_runnable_job(&self, runner: &Runner) -> Result<Option<Job>> {
        let mut candidates: Vec<Job> = self
            .jobs
            .list_runnable(self.batch_size)
            .await?
            .into_iter()
            .filter(|job| runner.can_pick(job))
            .collect();

        if self.fair_scheduling && !candidates.is_empty() {
            let projects: Vec<ProjectId> = candidates
                .iter()
                .map(|job| job.project_id)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            let running = self.jobs.count_running_by_project(&projects).await?;
            // Stable sort keeps age order within equally loaded projects.
            candidates.sort_by_key(|job| running.get(&job.project_id).copied().unwrap_or(0));
        }

        for job in candidates {
            match self.assign(&job, runner).await {
                Ok(job) => {
                    info!(job_id = %job.id, runner_id = %runner.id, "Assigned job to runner");
                    return Ok(Some(job));
                }
                Err(e @ (Error::StaleObject(_) | Error::InvalidTransition { .. })) => {
                    debug!(job_id = %job.id, error = %e, "Job taken concurrently, trying next");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    async fn assign(&self, job: &Job, runner: &Runner) -> Result<Job> {
        let mut job = job.clone();
        job.runner_id = Some(runner.id);

        if job.status == JobStatus::Pending {
            let (job, _) = self.transitions.apply(&job, JobEvent::Run).await?;
            if let Some(statuses) = &self.statuses {
                if let Err(e) = statuses.refresh(job.pipeline_id).await {
                    warn!(pipeline_id = %job.pipeline_id, error = %e, "Failed to refresh pipeline status");
                }
            }
            Ok(job)
        } else {
            self.jobs.update(&job).await
        }
    }
}
