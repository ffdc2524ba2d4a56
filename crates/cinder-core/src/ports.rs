//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the scheduling domain and the
//! persistence and messaging adapters.

use crate::events::Event;
use crate::ids::*;
use crate::job::Job;
use crate::pipeline::{Pipeline, PipelineCreationRequest};
use crate::resource_group::{ProcessMode, ResourceGroup, WaitEntry};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

/// Stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Event bus for publishing and subscribing to events.
///
/// Delivery is at-least-once; subscribers must tolerate duplicates.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: Event) -> Result<()>;

    /// Subscribe to events matching a pattern.
    /// Pattern supports wildcards: `job.*.status`, `resource_group.>`
    async fn subscribe(&self, pattern: &str) -> Result<EventStream>;
}

/// Repository for jobs.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Persist a modified job.
    ///
    /// Fails with `Error::StaleObject` when the stored `lock_version` differs
    /// from `job.lock_version`. Returns the job with its bumped lock version.
    async fn update(&self, job: &Job) -> Result<Job>;

    /// Insert a standalone job, e.g. a retry.
    async fn insert(&self, job: &Job) -> Result<()>;

    async fn list_by_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Job>>;

    /// Jobs a runner may take, oldest first: `pending` jobs without a
    /// resource group and granted `running` jobs with no runner yet.
    async fn list_runnable(&self, limit: u32) -> Result<Vec<Job>>;

    /// Running jobs that a runner holds, counted per project.
    async fn count_running_by_project(
        &self,
        project_ids: &[ProjectId],
    ) -> Result<HashMap<ProjectId, u64>>;

    /// Pending jobs that waited longer than `pending_timeout` for a runner,
    /// oldest first.
    async fn list_stuck_pending(
        &self,
        now: DateTime<Utc>,
        pending_timeout: chrono::Duration,
        limit: u32,
    ) -> Result<Vec<Job>>;

    /// Running jobs whose timeout elapsed by `now`, longest running first.
    async fn list_timed_out(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Job>>;

    /// Number of pending, waiting or running jobs in a project.
    async fn count_active_by_project(&self, project_id: ProjectId) -> Result<u64>;
}

/// Repository for pipelines.
#[async_trait]
pub trait PipelineRepository: Send + Sync {
    /// Persist a pipeline together with its jobs, atomically.
    async fn create(&self, pipeline: &Pipeline, jobs: &[Job]) -> Result<()>;

    async fn get(&self, id: PipelineId) -> Result<Option<Pipeline>>;

    async fn update(&self, pipeline: &Pipeline) -> Result<()>;
}

/// Repository for resource groups, their wait lists and holders.
#[async_trait]
pub trait ResourceGroupRepository: Send + Sync {
    /// Find the group with `key` in the project, creating it if absent.
    async fn find_or_create(&self, project_id: ProjectId, key: &str) -> Result<ResourceGroup>;

    async fn get(&self, id: ResourceGroupId) -> Result<Option<ResourceGroup>>;

    async fn set_process_mode(&self, id: ResourceGroupId, mode: ProcessMode) -> Result<()>;

    /// Groups whose wait list is not empty.
    async fn list_with_waiting(&self) -> Result<Vec<ResourceGroup>>;

    /// Append a job to the wait list. Enqueueing a job twice keeps the first entry.
    async fn enqueue(
        &self,
        id: ResourceGroupId,
        job_id: JobId,
        pipeline_id: PipelineId,
        at: DateTime<Utc>,
    ) -> Result<WaitEntry>;

    /// Remove a job from the wait list. Returns whether it was present.
    async fn remove(&self, id: ResourceGroupId, job_id: JobId) -> Result<bool>;

    /// Wait list in storage order.
    async fn wait_list(&self, id: ResourceGroupId) -> Result<Vec<WaitEntry>>;

    /// Atomically hand the free resource to `job_id` and drop its wait entry.
    ///
    /// Returns `false` immediately when the group is already held.
    async fn try_acquire(
        &self,
        id: ResourceGroupId,
        job_id: JobId,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Free the resource. A no-op returning `None` when it is already free.
    async fn release(&self, id: ResourceGroupId) -> Result<Option<JobId>>;

    /// Free the resource only if `job_id` holds it.
    async fn release_held_by(&self, id: ResourceGroupId, job_id: JobId) -> Result<bool>;
}

/// Repository for pipeline creation requests.
#[async_trait]
pub trait CreationRequestRepository: Send + Sync {
    async fn create(&self, request: &PipelineCreationRequest) -> Result<()>;

    async fn get(&self, id: CreationRequestId) -> Result<Option<PipelineCreationRequest>>;

    async fn update(&self, request: &PipelineCreationRequest) -> Result<()>;
}

/// Distributed lease used to keep periodic work single-flight across processes.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take the lease for `ttl`. Returns `false` while another owner holds an
    /// unexpired lease; an expired lease can be taken over.
    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Give the lease back if `owner` still holds it.
    async fn release_lease(&self, key: &str, owner: &str) -> Result<()>;
}
