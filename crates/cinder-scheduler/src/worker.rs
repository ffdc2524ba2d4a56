//! Periodic scheduler worker.
//!
//! Each sweep promotes waiting jobs in every resource group with a non-empty
//! wait list and drops jobs that are stuck or timed out. Sweeps are
//! single-flight across processes through a lease.

use chrono::Utc;
use cinder_core::Result;
use cinder_core::job::FailureReason;
use cinder_core::ports::{JobRepository, LeaseStore, ResourceGroupRepository};
use cron::Schedule;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::builds::BuildService;
use crate::config::SchedulerConfig;
use crate::resource_groups::ResourceGroupService;
use crate::stores::Stores;

pub const SWEEP_LEASE_KEY: &str = "scheduler:sweep";

const DEFAULT_BATCH_SIZE: u32 = 1000;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Jobs granted their resource group.
    pub promoted: usize,
    /// Stuck or timed out jobs that were failed.
    pub dropped: usize,
    /// Another worker held the sweep lease.
    pub skipped: bool,
    /// Groups or jobs whose handling failed.
    pub errors: usize,
}

pub struct SchedulerWorker {
    owner: String,
    groups: Arc<dyn ResourceGroupRepository>,
    jobs: Arc<dyn JobRepository>,
    leases: Arc<dyn LeaseStore>,
    resource_groups: ResourceGroupService,
    builds: BuildService,
    schedule: Schedule,
    schedule_expr: String,
    lease_ttl: Duration,
    pending_timeout: chrono::Duration,
    batch_size: u32,
}

impl SchedulerWorker {
    pub fn new(
        stores: &Stores,
        resource_groups: ResourceGroupService,
        builds: BuildService,
        config: &SchedulerConfig,
    ) -> Result<Self> {
        Ok(Self {
            owner: format!("worker-{}", Uuid::now_v7()),
            groups: stores.resource_groups.clone(),
            jobs: stores.jobs.clone(),
            leases: stores.leases.clone(),
            resource_groups,
            builds,
            schedule: config.cron_schedule()?,
            schedule_expr: config.schedule.clone(),
            lease_ttl: config.lease_ttl(),
            pending_timeout: config.pending_timeout(),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Name this worker when taking the sweep lease.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Run one sweep, unless another worker holds the lease.
    pub async fn perform(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        if !self
            .leases
            .acquire_lease(SWEEP_LEASE_KEY, &self.owner, self.lease_ttl)
            .await?
        {
            debug!(owner = %self.owner, "Sweep lease held by another worker, skipping");
            report.skipped = true;
            return Ok(report);
        }

        let result = self.sweep(&mut report).await;

        if let Err(e) = self.leases.release_lease(SWEEP_LEASE_KEY, &self.owner).await {
            warn!(owner = %self.owner, error = %e, "Failed to release sweep lease");
        }
        result?;

        info!(
            promoted = report.promoted,
            dropped = report.dropped,
            errors = report.errors,
            "Sweep completed"
        );
        Ok(report)
    }

    /// Sweep on every tick of the schedule until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(owner = %self.owner, schedule = %self.schedule_expr, "Starting scheduler worker");

        loop {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                warn!(schedule = %self.schedule_expr, "Schedule has no upcoming runs");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.perform().await {
                        error!(error = %e, "Sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn sweep(&self, report: &mut SweepReport) -> Result<()> {
        for group in self.groups.list_with_waiting().await? {
            match self.resource_groups.assign_resource(group.id).await {
                Ok(Some(job_id)) => {
                    debug!(resource_group = %group.key, job_id = %job_id, "Promoted waiting job");
                    report.promoted += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        resource_group = %group.key,
                        resource_group_id = %group.id,
                        error = %e,
                        "Failed to promote waiting job"
                    );
                    report.errors += 1;
                }
            }
        }

        let now = Utc::now();
        let mut overdue = self.jobs.list_timed_out(now, self.batch_size).await?;
        overdue.extend(
            self.jobs
                .list_stuck_pending(now, self.pending_timeout, self.batch_size)
                .await?,
        );

        for job in overdue {
            match self
                .builds
                .drop_job(job.id, FailureReason::StuckOrTimeoutFailure)
                .await
            {
                Ok(_) => {
                    info!(job_id = %job.id, job = %job.name, status = %job.status, "Dropped stuck job");
                    report.dropped += 1;
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Failed to drop stuck job");
                    report.errors += 1;
                }
            }
        }

        Ok(())
    }
}
