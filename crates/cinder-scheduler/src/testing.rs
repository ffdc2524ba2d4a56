//! Shared fixtures for the scheduler unit tests.

use chrono::Utc;
use cinder_core::ids::*;
use cinder_core::job::{Job, JobStatus, When};
use cinder_core::pipeline::{Pipeline, PipelineSource};
use cinder_core::ports::JobRepository;
use cinder_core::resource_group::{ProcessMode, ResourceGroup};
use cinder_db::MemoryStore;
use cinder_nats::LocalEventBus;
use std::sync::Arc;

use crate::builds::BuildService;
use crate::processing::PipelineProcessor;
use crate::resource_groups::ResourceGroupService;
use crate::status::PipelineStatusUpdater;
use crate::stores::Stores;
use crate::transitions::JobTransitions;

pub(crate) struct Harness {
    pub stores: Stores,
    pub events: Arc<LocalEventBus>,
    pub project_id: ProjectId,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            stores: Stores::from_memory(Arc::new(MemoryStore::new())),
            events: Arc::new(LocalEventBus::new()),
            project_id: ProjectId::new(),
        }
    }

    /// Swap the job repository, e.g. for one that injects failures.
    pub fn with_jobs(mut self, jobs: Arc<dyn JobRepository>) -> Self {
        self.stores.jobs = jobs;
        self
    }

    pub fn transitions(&self) -> JobTransitions {
        JobTransitions::new(self.stores.jobs.clone(), self.events.clone())
    }

    pub fn statuses(&self) -> PipelineStatusUpdater {
        PipelineStatusUpdater::new(
            self.stores.jobs.clone(),
            self.stores.pipelines.clone(),
            self.events.clone(),
        )
    }

    pub fn resource_groups(&self) -> ResourceGroupService {
        ResourceGroupService::new(
            self.stores.resource_groups.clone(),
            self.stores.jobs.clone(),
            self.transitions(),
            self.statuses(),
            self.events.clone(),
        )
    }

    pub fn processor(&self) -> PipelineProcessor {
        PipelineProcessor::new(
            self.stores.jobs.clone(),
            self.transitions(),
            self.resource_groups(),
            self.statuses(),
        )
    }

    pub fn builds(&self) -> BuildService {
        BuildService::new(
            self.stores.jobs.clone(),
            self.transitions(),
            self.resource_groups(),
            self.processor(),
        )
    }

    pub async fn group(&self, key: &str, mode: ProcessMode) -> ResourceGroup {
        let mut group = self
            .stores
            .resource_groups
            .find_or_create(self.project_id, key)
            .await
            .unwrap();
        self.stores
            .resource_groups
            .set_process_mode(group.id, mode)
            .await
            .unwrap();
        group.process_mode = mode;
        group
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline {
            id: PipelineId::new(),
            project_id: self.project_id,
            git_ref: "master".to_string(),
            sha: "a1b2c3d4".to_string(),
            source: PipelineSource::Push,
            status: JobStatus::Created,
            failure_reason: None,
            yaml_errors: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn new_job(
        &self,
        pipeline: &Pipeline,
        name: &str,
        stage_idx: u32,
        group: Option<ResourceGroupId>,
    ) -> Job {
        Job {
            id: JobId::new(),
            pipeline_id: pipeline.id,
            project_id: pipeline.project_id,
            name: name.to_string(),
            stage: format!("stage-{}", stage_idx),
            stage_idx,
            status: JobStatus::Created,
            when: When::OnSuccess,
            resource_group_id: group,
            tags: vec![],
            protected: false,
            timeout_secs: 3600,
            failure_reason: None,
            runner_id: None,
            retried_from: None,
            created_at: Utc::now(),
            queued_at: None,
            started_at: None,
            finished_at: None,
            lock_version: 0,
        }
    }

    /// Persist a pipeline with its jobs and register their wait entries.
    pub async fn create_pipeline(&self, pipeline: &Pipeline, jobs: &[Job]) {
        self.stores.pipelines.create(pipeline, jobs).await.unwrap();
        let service = self.resource_groups();
        for job in jobs {
            service.register(job).await.unwrap();
        }
    }

    pub async fn created_job(&self, group: Option<ResourceGroupId>) -> Job {
        let job = self.new_job(&self.pipeline(), "deploy", 0, group);
        self.stores.jobs.insert(&job).await.unwrap();
        job
    }

    pub async fn pending_job(&self, group: Option<ResourceGroupId>) -> Job {
        let mut job = self.new_job(&self.pipeline(), "deploy", 0, group);
        job.enqueue(Utc::now()).unwrap();
        self.stores.jobs.insert(&job).await.unwrap();
        job
    }

    pub async fn job(&self, id: JobId) -> Job {
        self.stores.jobs.get(id).await.unwrap().unwrap()
    }

    pub async fn set_status(&self, id: JobId, status: JobStatus) -> Job {
        let mut job = self.job(id).await;
        job.status = status;
        self.stores.jobs.update(&job).await.unwrap()
    }

    pub async fn holder(&self, group: ResourceGroupId) -> Option<JobId> {
        self.stores
            .resource_groups
            .get(group)
            .await
            .unwrap()
            .unwrap()
            .holder
    }

    pub async fn wait_list(&self, group: ResourceGroupId) -> Vec<JobId> {
        self.stores
            .resource_groups
            .wait_list(group)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.job_id)
            .collect()
    }
}
