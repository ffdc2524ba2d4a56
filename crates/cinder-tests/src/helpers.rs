//! Test helper functions and utilities.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinder_core::Result;
use cinder_core::ids::{JobId, PipelineId, ProjectId};
use cinder_core::job::{Job, JobStatus};
use cinder_core::pipeline::{PipelineCreationRequest, PipelineSource};
use cinder_core::ports::{EventBus, JobRepository};
use cinder_core::resource_group::{ProcessMode, ResourceGroup};
use cinder_nats::LocalEventBus;
use cinder_scheduler::{Command, Scheduler, SchedulerConfig, Stores};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A scheduler over the in-memory store and the in-process event bus,
/// scoped to a single project.
pub struct TestScheduler {
    pub scheduler: Scheduler,
    pub events: Arc<LocalEventBus>,
    pub project_id: ProjectId,
}

impl TestScheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::build(Stores::in_memory(), config)
    }

    /// Build over `stores`, e.g. after wrapping one of the repositories.
    pub fn build(stores: Stores, config: SchedulerConfig) -> Self {
        crate::init_test_logging();

        let events = Arc::new(LocalEventBus::new());
        let bus: Arc<dyn EventBus> = events.clone();
        let scheduler = Scheduler::new(stores, bus, &config).expect("valid scheduler config");

        Self {
            scheduler,
            events,
            project_id: ProjectId::new(),
        }
    }

    pub fn stores(&self) -> &Stores {
        self.scheduler.stores()
    }

    /// Run pipeline creation for `config` on `master`.
    pub async fn create(&self, config: &str) -> PipelineCreationRequest {
        self.create_on_ref("master", config).await
    }

    pub async fn create_on_ref(&self, git_ref: &str, config: &str) -> PipelineCreationRequest {
        self.execute(
            Command::new(self.project_id, git_ref, "0123456789abcdef", PipelineSource::Push)
                .with_config(config),
        )
        .await
    }

    pub async fn execute(&self, command: Command) -> PipelineCreationRequest {
        self.scheduler
            .creation()
            .execute(command)
            .await
            .expect("creation request is persisted")
    }

    /// Create a pipeline that must succeed and return its id.
    pub async fn pipeline(&self, config: &str) -> PipelineId {
        let request = self.create(config).await;
        request
            .pipeline_id
            .unwrap_or_else(|| panic!("pipeline creation failed: {:?}", request.error))
    }

    pub async fn jobs(&self, pipeline_id: PipelineId) -> Vec<Job> {
        self.stores()
            .jobs
            .list_by_pipeline(pipeline_id)
            .await
            .expect("list jobs")
    }

    /// The job called `name` in a pipeline.
    pub async fn job(&self, pipeline_id: PipelineId, name: &str) -> Job {
        self.jobs(pipeline_id)
            .await
            .into_iter()
            .find(|job| job.name == name)
            .unwrap_or_else(|| panic!("no job named {}", name))
    }

    pub async fn reload(&self, job_id: JobId) -> Job {
        self.stores()
            .jobs
            .get(job_id)
            .await
            .expect("get job")
            .expect("job exists")
    }

    /// Find or create the project's group and set its process mode.
    pub async fn group(&self, key: &str, mode: ProcessMode) -> ResourceGroup {
        let groups = &self.stores().resource_groups;
        let mut group = groups
            .find_or_create(self.project_id, key)
            .await
            .expect("find or create group");
        groups
            .set_process_mode(group.id, mode)
            .await
            .expect("set process mode");
        group.process_mode = mode;
        group
    }

    pub async fn holder(&self, key: &str) -> Option<JobId> {
        self.stores()
            .resource_groups
            .find_or_create(self.project_id, key)
            .await
            .expect("find group")
            .holder
    }

    pub async fn wait_list(&self, key: &str) -> Vec<JobId> {
        let groups = &self.stores().resource_groups;
        let group = groups
            .find_or_create(self.project_id, key)
            .await
            .expect("find group");
        groups
            .wait_list(group.id)
            .await
            .expect("wait list")
            .into_iter()
            .map(|entry| entry.job_id)
            .collect()
    }
}

impl Default for TestScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Job repository that rejects moving one chosen job to `running`,
/// as if its row were locked by another transaction.
pub struct FailingJobRepository {
    inner: Arc<dyn JobRepository>,
    fail_for: Mutex<Option<JobId>>,
}

impl FailingJobRepository {
    pub fn new(inner: Arc<dyn JobRepository>) -> Self {
        Self {
            inner,
            fail_for: Mutex::new(None),
        }
    }

    pub fn fail_for(&self, job_id: JobId) {
        *self.fail_for.lock().unwrap() = Some(job_id);
    }
}

#[async_trait]
impl JobRepository for FailingJobRepository {
    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        self.inner.get(id).await
    }

    async fn update(&self, job: &Job) -> Result<Job> {
        let failing = *self.fail_for.lock().unwrap();
        if job.status == JobStatus::Running && failing == Some(job.id) {
            return Err(cinder_core::Error::Database(format!(
                "could not obtain lock on job {}",
                job.id
            )));
        }
        self.inner.update(job).await
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        self.inner.insert(job).await
    }

    async fn list_by_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Job>> {
        self.inner.list_by_pipeline(pipeline_id).await
    }

    async fn list_runnable(&self, limit: u32) -> Result<Vec<Job>> {
        self.inner.list_runnable(limit).await
    }

    async fn count_running_by_project(
        &self,
        project_ids: &[ProjectId],
    ) -> Result<HashMap<ProjectId, u64>> {
        self.inner.count_running_by_project(project_ids).await
    }

    async fn list_stuck_pending(
        &self,
        now: DateTime<Utc>,
        pending_timeout: chrono::Duration,
        limit: u32,
    ) -> Result<Vec<Job>> {
        self.inner.list_stuck_pending(now, pending_timeout, limit).await
    }

    async fn list_timed_out(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Job>> {
        self.inner.list_timed_out(now, limit).await
    }

    async fn count_active_by_project(&self, project_id: ProjectId) -> Result<u64> {
        self.inner.count_active_by_project(project_id).await
    }
}
