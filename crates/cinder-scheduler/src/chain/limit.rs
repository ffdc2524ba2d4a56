//! Quota steps.

use async_trait::async_trait;
use cinder_core::Result;
use cinder_core::job::FailureReason;
use cinder_core::ports::JobRepository;
use std::sync::Arc;
use tracing::info;

use super::{Context, HaltReason, Step};

/// Caps the number of jobs in one pipeline. A limit of zero disables it.
pub struct Size {
    max_jobs: usize,
}

impl Size {
    pub fn new(max_jobs: usize) -> Self {
        Self { max_jobs }
    }
}

#[async_trait]
impl Step for Size {
    fn name(&self) -> &'static str {
        "limit_size"
    }

    async fn perform(&self, ctx: &mut Context) -> Result<()> {
        let requested = ctx.seeds.len();
        if self.max_jobs == 0 || requested <= self.max_jobs {
            return Ok(());
        }

        info!(
            project_id = %ctx.command.project_id,
            requested,
            limit = self.max_jobs,
            "Pipeline size limit exceeded"
        );
        ctx.halt(HaltReason::drop_with(
            format!(
                "Pipeline has too many jobs! Requested {}, but the limit is {}.",
                requested, self.max_jobs
            ),
            FailureReason::SizeLimitExceeded,
        ));
        Ok(())
    }
}

/// Caps the active jobs of a project, counting the ones about to be created.
/// A limit of zero disables it.
pub struct JobActivity {
    jobs: Arc<dyn JobRepository>,
    max_active: u64,
}

impl JobActivity {
    pub fn new(jobs: Arc<dyn JobRepository>, max_active: u64) -> Self {
        Self { jobs, max_active }
    }
}

#[async_trait]
impl Step for JobActivity {
    fn name(&self) -> &'static str {
        "limit_job_activity"
    }

    async fn perform(&self, ctx: &mut Context) -> Result<()> {
        if self.max_active == 0 {
            return Ok(());
        }

        let project_id = ctx.command.project_id;
        let active = self.jobs.count_active_by_project(project_id).await?;
        if active + ctx.seeds.len() as u64 <= self.max_active {
            return Ok(());
        }

        info!(project_id = %project_id, active, limit = self.max_active, "Job activity limit exceeded");
        ctx.halt(HaltReason::drop_with(
            format!(
                "Project has too many active jobs! There are {} active jobs, which exceeds the limit of {}.",
                active, self.max_active
            ),
            FailureReason::JobActivityLimitExceeded,
        ));
        Ok(())
    }
}
