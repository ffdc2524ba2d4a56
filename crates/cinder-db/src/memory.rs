//! In-memory implementation of the repository ports.
//!
//! All state lives behind one lock, so every port call is atomic with
//! respect to the others, mirroring a single database transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinder_core::ids::*;
use cinder_core::job::{Job, JobStatus};
use cinder_core::pipeline::{Pipeline, PipelineCreationRequest};
use cinder_core::ports::{
    CreationRequestRepository, JobRepository, LeaseStore, PipelineRepository,
    ResourceGroupRepository,
};
use cinder_core::resource_group::{ProcessMode, ResourceGroup, WaitEntry};
use cinder_core::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    job_order: Vec<JobId>,
    pipelines: HashMap<PipelineId, Pipeline>,
    groups: HashMap<ResourceGroupId, ResourceGroup>,
    group_order: Vec<ResourceGroupId>,
    wait_lists: HashMap<ResourceGroupId, Vec<WaitEntry>>,
    next_sequence: u64,
    requests: HashMap<CreationRequestId, PipelineCreationRequest>,
    leases: HashMap<String, Lease>,
}

struct Lease {
    owner: String,
    expires_at: DateTime<Utc>,
}

impl State {
    fn insert_job(&mut self, job: &Job) {
        if self.jobs.insert(job.id, job.clone()).is_none() {
            self.job_order.push(job.id);
        }
    }

    /// Matching jobs in insertion order, stably sorted by `key` and truncated.
    fn select_jobs<K: Ord>(
        &self,
        filter: impl Fn(&Job) -> bool,
        key: impl Fn(&Job) -> K,
        limit: u32,
    ) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .job_order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .filter(|job| filter(job))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| key(job));
        jobs.truncate(limit as usize);
        jobs
    }

    fn group_mut(&mut self, id: ResourceGroupId) -> Result<&mut ResourceGroup> {
        self.groups
            .get_mut(&id)
            .ok_or_else(|| Error::ResourceGroupNotFound(id.to_string()))
    }
}

/// Process-local store implementing every repository port.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<Job> {
        let mut state = self.state.write().await;
        let stored = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| Error::JobNotFound(job.id.to_string()))?;

        if stored.lock_version != job.lock_version {
            return Err(Error::StaleObject(job.id.to_string()));
        }

        let mut updated = job.clone();
        updated.lock_version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.id) {
            return Err(Error::Database(format!("duplicate job {}", job.id)));
        }
        state.insert_job(job);
        Ok(())
    }

    async fn list_by_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .job_order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| job.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.stage_idx);
        Ok(jobs)
    }

    async fn list_runnable(&self, limit: u32) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        Ok(state.select_jobs(
            |job| match job.status {
                JobStatus::Pending => job.resource_group_id.is_none(),
                JobStatus::Running => job.resource_group_id.is_some() && job.runner_id.is_none(),
                _ => false,
            },
            |job| job.created_at,
            limit,
        ))
    }

    async fn count_running_by_project(
        &self,
        project_ids: &[ProjectId],
    ) -> Result<HashMap<ProjectId, u64>> {
        let state = self.state.read().await;
        let mut running = HashMap::new();
        for job in state.jobs.values().filter(|job| {
            job.status == JobStatus::Running
                && job.runner_id.is_some()
                && project_ids.contains(&job.project_id)
        }) {
            *running.entry(job.project_id).or_insert(0) += 1;
        }
        Ok(running)
    }

    async fn list_stuck_pending(
        &self,
        now: DateTime<Utc>,
        pending_timeout: chrono::Duration,
        limit: u32,
    ) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        Ok(state.select_jobs(
            |job| job.is_stuck_pending(now, pending_timeout),
            |job| job.queued_at,
            limit,
        ))
    }

    async fn list_timed_out(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        Ok(state.select_jobs(|job| job.is_timed_out(now), |job| job.started_at, limit))
    }

    async fn count_active_by_project(&self, project_id: ProjectId) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| job.project_id == project_id && job.status.is_active())
            .count() as u64)
    }
}

#[async_trait]
impl PipelineRepository for MemoryStore {
    async fn create(&self, pipeline: &Pipeline, jobs: &[Job]) -> Result<()> {
        let mut state = self.state.write().await;
        if state.pipelines.contains_key(&pipeline.id) {
            return Err(Error::Database(format!("duplicate pipeline {}", pipeline.id)));
        }
        if let Some(job) = jobs.iter().find(|job| state.jobs.contains_key(&job.id)) {
            return Err(Error::Database(format!("duplicate job {}", job.id)));
        }

        state.pipelines.insert(pipeline.id, pipeline.clone());
        for job in jobs {
            state.insert_job(job);
        }
        debug!(pipeline_id = %pipeline.id, jobs = jobs.len(), "Stored pipeline");
        Ok(())
    }

    async fn get(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        Ok(self.state.read().await.pipelines.get(&id).cloned())
    }

    async fn update(&self, pipeline: &Pipeline) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .pipelines
            .get_mut(&pipeline.id)
            .ok_or_else(|| Error::PipelineNotFound(pipeline.id.to_string()))?;
        *stored = pipeline.clone();
        Ok(())
    }
}

#[async_trait]
impl ResourceGroupRepository for MemoryStore {
    async fn find_or_create(&self, project_id: ProjectId, key: &str) -> Result<ResourceGroup> {
        let mut state = self.state.write().await;
        let existing = state
            .group_order
            .iter()
            .filter_map(|id| state.groups.get(id))
            .find(|group| group.project_id == project_id && group.key == key)
            .cloned();
        if let Some(group) = existing {
            return Ok(group);
        }

        let group = ResourceGroup::new(project_id, key, Utc::now());
        state.groups.insert(group.id, group.clone());
        state.group_order.push(group.id);
        debug!(resource_group = %key, "Created resource group");
        Ok(group)
    }

    async fn get(&self, id: ResourceGroupId) -> Result<Option<ResourceGroup>> {
        Ok(self.state.read().await.groups.get(&id).cloned())
    }

    async fn set_process_mode(&self, id: ResourceGroupId, mode: ProcessMode) -> Result<()> {
        let mut state = self.state.write().await;
        state.group_mut(id)?.process_mode = mode;
        Ok(())
    }

    async fn list_with_waiting(&self) -> Result<Vec<ResourceGroup>> {
        let state = self.state.read().await;
        Ok(state
            .group_order
            .iter()
            .filter(|id| state.wait_lists.get(*id).is_some_and(|list| !list.is_empty()))
            .filter_map(|id| state.groups.get(id))
            .cloned()
            .collect())
    }

    async fn enqueue(
        &self,
        id: ResourceGroupId,
        job_id: JobId,
        pipeline_id: PipelineId,
        at: DateTime<Utc>,
    ) -> Result<WaitEntry> {
        let mut state = self.state.write().await;
        state.group_mut(id)?;

        let sequence = state.next_sequence;
        let list = state.wait_lists.entry(id).or_default();
        if let Some(entry) = list.iter().find(|entry| entry.job_id == job_id) {
            return Ok(entry.clone());
        }

        let entry = WaitEntry {
            job_id,
            pipeline_id,
            enqueued_at: at,
            sequence,
        };
        list.push(entry.clone());
        state.next_sequence += 1;
        Ok(entry)
    }

    async fn remove(&self, id: ResourceGroupId, job_id: JobId) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(list) = state.wait_lists.get_mut(&id) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|entry| entry.job_id != job_id);
        Ok(list.len() != before)
    }

    async fn wait_list(&self, id: ResourceGroupId) -> Result<Vec<WaitEntry>> {
        let state = self.state.read().await;
        Ok(state.wait_lists.get(&id).cloned().unwrap_or_default())
    }

    async fn try_acquire(
        &self,
        id: ResourceGroupId,
        job_id: JobId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let group = state.group_mut(id)?;
        if group.holder.is_some() {
            return Ok(false);
        }
        group.holder = Some(job_id);
        group.acquired_at = Some(at);

        if let Some(list) = state.wait_lists.get_mut(&id) {
            list.retain(|entry| entry.job_id != job_id);
        }
        Ok(true)
    }

    async fn release(&self, id: ResourceGroupId) -> Result<Option<JobId>> {
        let mut state = self.state.write().await;
        let group = state.group_mut(id)?;
        group.acquired_at = None;
        Ok(group.holder.take())
    }

    async fn release_held_by(&self, id: ResourceGroupId, job_id: JobId) -> Result<bool> {
        let mut state = self.state.write().await;
        let group = state.group_mut(id)?;
        if group.holder != Some(job_id) {
            return Ok(false);
        }
        group.holder = None;
        group.acquired_at = None;
        Ok(true)
    }
}

#[async_trait]
impl CreationRequestRepository for MemoryStore {
    async fn create(&self, request: &PipelineCreationRequest) -> Result<()> {
        let mut state = self.state.write().await;
        state.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get(&self, id: CreationRequestId) -> Result<Option<PipelineCreationRequest>> {
        Ok(self.state.read().await.requests.get(&id).cloned())
    }

    async fn update(&self, request: &PipelineCreationRequest) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .requests
            .get_mut(&request.id)
            .ok_or_else(|| Error::CreationRequestNotFound(request.id.to_string()))?;
        *stored = request.clone();
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::Internal(e.to_string()))?;

        let mut state = self.state.write().await;
        let held_by_other = state
            .leases
            .get(key)
            .is_some_and(|lease| lease.owner != owner && lease.expires_at > now);
        if held_by_other {
            return Ok(false);
        }

        state.leases.insert(
            key.to_string(),
            Lease {
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, key: &str, owner: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.leases.get(key).is_some_and(|lease| lease.owner == owner) {
            state.leases.remove(key);
        }
        Ok(())
    }
}
