//! Stage-ordered pipeline progression.

use cinder_core::ids::{JobId, PipelineId};
use cinder_core::job::{Job, JobEvent, JobStatus, When};
use cinder_core::ports::JobRepository;
use cinder_core::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::resource_groups::ResourceGroupService;
use crate::status::{PipelineStatusUpdater, latest};
use crate::transitions::JobTransitions;

/// Advances a pipeline through its stages and keeps its status current.
#[derive(Clone)]
pub struct PipelineProcessor {
    jobs: Arc<dyn JobRepository>,
    transitions: JobTransitions,
    resource_groups: ResourceGroupService,
    statuses: PipelineStatusUpdater,
}

impl PipelineProcessor {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        transitions: JobTransitions,
        resource_groups: ResourceGroupService,
        statuses: PipelineStatusUpdater,
    ) -> Self {
        Self {
            jobs,
            transitions,
            resource_groups,
            statuses,
        }
    }

    /// Enqueue the jobs of the current stage, skip jobs behind a failed
    /// stage and recompute the pipeline status.
    ///
    /// Safe to call repeatedly; a pass without changes is a no-op.
    pub async fn process(&self, pipeline_id: PipelineId) -> Result<JobStatus> {
        let jobs = latest(self.jobs.list_by_pipeline(pipeline_id).await?);

        let mut stages: BTreeMap<u32, Vec<Job>> = BTreeMap::new();
        for job in jobs {
            stages.entry(job.stage_idx).or_default().push(job);
        }

        let mut failed = false;
        for (stage_idx, jobs) in &stages {
            if failed {
                for job in jobs.iter().filter(|job| job.status == JobStatus::Created) {
                    tolerate_race(job.id, self.skip(job).await)?;
                }
                continue;
            }

            let unfinished = jobs.iter().any(|job| blocks_stage(job));
            if unfinished {
                for job in jobs
                    .iter()
                    .filter(|job| job.status == JobStatus::Created && job.when == When::OnSuccess)
                {
                    tolerate_race(job.id, self.enqueue(job).await)?;
                }
                debug!(pipeline_id = %pipeline_id, stage_idx, "Stage in progress");
                break;
            }

            failed = jobs
                .iter()
                .any(|job| matches!(job.status, JobStatus::Failed | JobStatus::Canceled));
        }

        let status = self.statuses.refresh(pipeline_id).await?;
        if status.is_terminal() {
            self.leave_wait_lists(stages.values().flatten()).await?;
        }
        Ok(status)
    }

    /// A finished pipeline keeps no place in any resource group lane.
    async fn leave_wait_lists<'a>(&self, jobs: impl Iterator<Item = &'a Job>) -> Result<()> {
        for job in jobs.filter(|job| job.status == JobStatus::Created) {
            if let Some(group_id) = job.resource_group_id {
                self.resource_groups.leave(group_id, job.id).await?;
            }
        }
        Ok(())
    }

    /// Cancel every unfinished job of a pipeline whose creation was halted.
    ///
    /// Held resources are given back and wait entries removed. The pipeline
    /// status is left to the caller.
    pub async fn abandon(&self, pipeline_id: PipelineId) -> Result<usize> {
        let jobs = self.jobs.list_by_pipeline(pipeline_id).await?;
        let mut canceled = 0;

        for job in jobs.iter().filter(|job| !job.status.is_terminal()) {
            let (job, transition) = match self.transitions.apply(job, JobEvent::Cancel).await {
                Ok(applied) => applied,
                Err(e @ (Error::StaleObject(_) | Error::InvalidTransition { .. })) => {
                    debug!(job_id = %job.id, error = %e, "Job changed concurrently");
                    continue;
                }
                Err(e) => return Err(e),
            };
            canceled += 1;

            if let Some(group_id) = job.resource_group_id {
                if transition.releases_resource() {
                    self.resource_groups.release_held_by(group_id, job.id).await?;
                } else {
                    self.resource_groups.leave(group_id, job.id).await?;
                }
            }
        }

        if canceled > 0 {
            info!(pipeline_id = %pipeline_id, canceled, "Canceled jobs of halted pipeline");
        }
        Ok(canceled)
    }

    async fn enqueue(&self, job: &Job) -> Result<()> {
        let (job, _) = self.transitions.apply(job, JobEvent::Enqueue).await?;
        if job.with_resource_group() {
            self.resource_groups.request_resource(&job).await?;
        }
        Ok(())
    }

    async fn skip(&self, job: &Job) -> Result<()> {
        let (job, _) = self.transitions.apply(job, JobEvent::Skip).await?;
        if let Some(group_id) = job.resource_group_id {
            self.resource_groups.leave(group_id, job.id).await?;
        }
        Ok(())
    }
}

/// Unplayed manual jobs never hold up their stage.
fn blocks_stage(job: &Job) -> bool {
    !job.status.is_terminal() && !job.is_unplayed_manual()
}

/// Another pass already moved the job on.
fn tolerate_race(job_id: JobId, result: Result<()>) -> Result<()> {
    match result {
        Err(e @ (Error::StaleObject(_) | Error::InvalidTransition { .. })) => {
            debug!(job_id = %job_id, error = %e, "Job changed concurrently");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use cinder_core::events::Event;
    use cinder_core::ports::EventBus;
    use cinder_core::resource_group::ProcessMode;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_first_stage_enqueued() {
        let harness = Harness::new();
        let pipeline = harness.pipeline();
        let build = harness.new_job(&pipeline, "build", 0, None);
        let test = harness.new_job(&pipeline, "test", 1, None);
        harness.create_pipeline(&pipeline, &[build.clone(), test.clone()]).await;

        let status = harness.processor().process(pipeline.id).await.unwrap();

        assert_eq!(status, JobStatus::Pending);
        assert_eq!(harness.job(build.id).await.status, JobStatus::Pending);
        assert_eq!(harness.job(test.id).await.status, JobStatus::Created);
    }

    #[tokio::test]
    async fn test_next_stage_after_success() {
        let harness = Harness::new();
        let pipeline = harness.pipeline();
        let build = harness.new_job(&pipeline, "build", 0, None);
        let test = harness.new_job(&pipeline, "test", 1, None);
        harness.create_pipeline(&pipeline, &[build.clone(), test.clone()]).await;
        harness.set_status(build.id, JobStatus::Success).await;

        let status = harness.processor().process(pipeline.id).await.unwrap();

        assert_eq!(status, JobStatus::Pending);
        assert_eq!(harness.job(test.id).await.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_failed_stage_skips_later_jobs() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::OldestFirst).await;
        let pipeline = harness.pipeline();
        let build = harness.new_job(&pipeline, "build", 0, None);
        let deploy = harness.new_job(&pipeline, "deploy", 1, Some(group.id));
        harness.create_pipeline(&pipeline, &[build.clone(), deploy.clone()]).await;
        harness.set_status(build.id, JobStatus::Failed).await;

        let status = harness.processor().process(pipeline.id).await.unwrap();

        assert_eq!(status, JobStatus::Failed);
        assert_eq!(harness.job(deploy.id).await.status, JobStatus::Skipped);
        assert!(harness.wait_list(group.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_manual_job_does_not_block() {
        let harness = Harness::new();
        let pipeline = harness.pipeline();
        let mut manual = harness.new_job(&pipeline, "rollback", 0, None);
        manual.when = When::Manual;
        let test = harness.new_job(&pipeline, "test", 1, None);
        harness.create_pipeline(&pipeline, &[manual.clone(), test.clone()]).await;

        harness.processor().process(pipeline.id).await.unwrap();

        assert_eq!(harness.job(manual.id).await.status, JobStatus::Created);
        assert_eq!(harness.job(test.id).await.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_finished_pipeline_leaves_wait_lists() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::OldestFirst).await;
        let pipeline = harness.pipeline();
        let build = harness.new_job(&pipeline, "build", 0, None);
        let mut rollback = harness.new_job(&pipeline, "rollback", 0, Some(group.id));
        rollback.when = When::Manual;
        harness.create_pipeline(&pipeline, &[build.clone(), rollback.clone()]).await;
        harness
            .stores
            .resource_groups
            .enqueue(group.id, rollback.id, pipeline.id, rollback.created_at)
            .await
            .unwrap();
        harness.set_status(build.id, JobStatus::Success).await;

        let status = harness.processor().process(pipeline.id).await.unwrap();

        assert_eq!(status, JobStatus::Success);
        assert_eq!(harness.job(rollback.id).await.status, JobStatus::Created);
        assert!(harness.wait_list(group.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_resource_job_granted_on_enqueue() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::OldestFirst).await;
        let pipeline = harness.pipeline();
        let deploy = harness.new_job(&pipeline, "deploy", 0, Some(group.id));
        harness.create_pipeline(&pipeline, &[deploy.clone()]).await;

        let status = harness.processor().process(pipeline.id).await.unwrap();

        assert_eq!(status, JobStatus::Running);
        assert_eq!(harness.holder(group.id).await, Some(deploy.id));
    }

    #[tokio::test]
    async fn test_abandon_frees_groups() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::OldestFirst).await;
        let pipeline = harness.pipeline();
        let deploy = harness.new_job(&pipeline, "deploy", 0, Some(group.id));
        let verify = harness.new_job(&pipeline, "verify", 1, Some(group.id));
        harness.create_pipeline(&pipeline, &[deploy.clone(), verify.clone()]).await;
        let processor = harness.processor();
        processor.process(pipeline.id).await.unwrap();
        assert_eq!(harness.holder(group.id).await, Some(deploy.id));

        assert_eq!(processor.abandon(pipeline.id).await.unwrap(), 2);

        assert_eq!(harness.job(deploy.id).await.status, JobStatus::Canceled);
        assert_eq!(harness.job(verify.id).await.status, JobStatus::Canceled);
        assert!(harness.holder(group.id).await.is_none());
        assert!(harness.wait_list(group.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_status_change_published_once() {
        let harness = Harness::new();
        let pipeline = harness.pipeline();
        let build = harness.new_job(&pipeline, "build", 0, None);
        harness.create_pipeline(&pipeline, &[build]).await;
        let mut events = harness
            .events
            .subscribe(&format!("pipeline.{}.status", pipeline.id))
            .await
            .unwrap();

        let processor = harness.processor();
        processor.process(pipeline.id).await.unwrap();
        processor.process(pipeline.id).await.unwrap();

        let Event::PipelineStatusChanged(change) = events.next().await.unwrap().unwrap() else {
            panic!("expected a pipeline status change");
        };
        assert_eq!(change.from, JobStatus::Created);
        assert_eq!(change.to, JobStatus::Pending);

        let second = tokio::time::timeout(std::time::Duration::from_millis(50), events.next()).await;
        assert!(second.is_err(), "unchanged status was published again");
    }
}
