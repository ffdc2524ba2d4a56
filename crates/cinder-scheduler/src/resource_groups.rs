//! Granting and releasing resource groups.
//!
//! The wait list of a group holds every job registered for it. Whenever the
//! group may have a free slot (a holder finished, a waiter left, a job started
//! waiting, or the periodic sweep) `assign_resource` asks the group's process
//! mode for the next job and hands the resource over with a compare-and-swap.

use chrono::Utc;
use cinder_core::events::{Event, ResourceGrantedPayload, ResourceReleasedPayload};
use cinder_core::ids::{JobId, ResourceGroupId};
use cinder_core::job::{Job, JobEvent, JobStatus};
use cinder_core::ports::{EventBus, JobRepository, ResourceGroupRepository};
use cinder_core::resource_group::{Candidate, ResourceGroup, WaitEntry};
use cinder_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::status::PipelineStatusUpdater;
use crate::transitions::{JobTransitions, publish};

#[derive(Clone)]
pub struct ResourceGroupService {
    groups: Arc<dyn ResourceGroupRepository>,
    jobs: Arc<dyn JobRepository>,
    transitions: JobTransitions,
    statuses: PipelineStatusUpdater,
    events: Arc<dyn EventBus>,
}

impl ResourceGroupService {
    pub fn new(
        groups: Arc<dyn ResourceGroupRepository>,
        jobs: Arc<dyn JobRepository>,
        transitions: JobTransitions,
        statuses: PipelineStatusUpdater,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            groups,
            jobs,
            transitions,
            statuses,
            events,
        }
    }

    /// Put a freshly created job on its group's wait list.
    ///
    /// Unplayed manual jobs are left out until they request the resource.
    pub async fn register(&self, job: &Job) -> Result<()> {
        let Some(group_id) = job.resource_group_id else {
            return Ok(());
        };
        if job.is_unplayed_manual() {
            return Ok(());
        }
        self.groups
            .enqueue(group_id, job.id, job.pipeline_id, job.created_at)
            .await?;
        Ok(())
    }

    /// Move a job to `waiting_for_resource` and try to grant it right away.
    pub async fn request_resource(&self, job: &Job) -> Result<()> {
        let group_id = job
            .resource_group_id
            .ok_or_else(|| Error::MissingResourceGroup(job.id.to_string()))?;

        // Jobs are normally registered at pipeline creation; this keeps that entry.
        self.groups
            .enqueue(group_id, job.id, job.pipeline_id, job.created_at)
            .await?;
        self.transitions
            .apply(job, JobEvent::RequestResource)
            .await?;

        self.reassign(group_id).await;
        Ok(())
    }

    /// Grant the group to the job its process mode selects, if the group is free.
    ///
    /// Returns the granted job. Wait entries of jobs that can no longer be
    /// granted are pruned along the way.
    pub async fn assign_resource(&self, id: ResourceGroupId) -> Result<Option<JobId>> {
        let group = self.group(id).await?;
        if !group.is_free() {
            return Ok(None);
        }

        let entries = self.groups.wait_list(id).await?;
        let mut candidates = Vec::with_capacity(entries.len());
        let mut waiting: HashMap<JobId, (Job, &WaitEntry)> = HashMap::new();

        for entry in &entries {
            match self.jobs.get(entry.job_id).await? {
                Some(job) if job.status == JobStatus::WaitingForResource => {
                    candidates.push(Candidate::from_entry(entry, true));
                    waiting.insert(job.id, (job, entry));
                }
                Some(job)
                    if matches!(job.status, JobStatus::Created | JobStatus::Pending)
                        && !job.is_unplayed_manual() =>
                {
                    candidates.push(Candidate::from_entry(entry, false));
                }
                _ => {
                    self.groups.remove(id, entry.job_id).await?;
                    debug!(
                        resource_group = %group.key,
                        job_id = %entry.job_id,
                        "Pruned wait entry of a job that cannot be granted"
                    );
                }
            }
        }

        let Some(job_id) = group
            .process_mode
            .select(&candidates, group.free_slots())
        else {
            return Ok(None);
        };
        let Some((job, entry)) = waiting.remove(&job_id) else {
            return Ok(None);
        };

        let now = Utc::now();
        if !self.groups.try_acquire(id, job_id, now).await? {
            debug!(resource_group = %group.key, job_id = %job_id, "Resource taken concurrently");
            return Ok(None);
        }

        match self.transitions.apply(&job, JobEvent::Run).await {
            Ok((job, _)) => {
                info!(
                    resource_group = %group.key,
                    process_mode = %group.process_mode,
                    job_id = %job_id,
                    "Granted resource"
                );
                publish(
                    self.events.as_ref(),
                    Event::ResourceGranted(ResourceGrantedPayload {
                        resource_group_id: id,
                        key: group.key.clone(),
                        job_id,
                        granted_at: now,
                    }),
                )
                .await;

                if let Err(e) = self.statuses.refresh(job.pipeline_id).await {
                    warn!(pipeline_id = %job.pipeline_id, error = %e, "Failed to refresh pipeline status");
                }
                Ok(Some(job_id))
            }
            Err(e) => {
                warn!(
                    resource_group = %group.key,
                    job_id = %job_id,
                    error = %e,
                    "Failed to start granted job, returning resource"
                );
                self.groups.release_held_by(id, job_id).await?;
                self.groups
                    .enqueue(id, job_id, entry.pipeline_id, entry.enqueued_at)
                    .await?;
                Err(e)
            }
        }
    }

    /// Free the group regardless of its holder. A no-op when it is already free.
    ///
    /// Returns the job that held it.
    pub async fn release(&self, id: ResourceGroupId) -> Result<Option<JobId>> {
        let group = self.group(id).await?;
        let Some(holder) = self.groups.release(id).await? else {
            debug!(resource_group = %group.key, "Release of a free resource ignored");
            return Ok(None);
        };

        self.released(&group, holder).await;
        self.reassign(id).await;
        Ok(Some(holder))
    }

    /// Free the group only if `job_id` holds it, then pass it on.
    pub async fn release_held_by(&self, id: ResourceGroupId, job_id: JobId) -> Result<bool> {
        if !self.groups.release_held_by(id, job_id).await? {
            return Ok(false);
        }

        let group = self.group(id).await?;
        self.released(&group, job_id).await;
        self.reassign(id).await;
        Ok(true)
    }

    /// Take a job that never held the resource off the wait list.
    pub async fn leave(&self, id: ResourceGroupId, job_id: JobId) -> Result<bool> {
        let removed = self.groups.remove(id, job_id).await?;
        if removed {
            debug!(resource_group_id = %id, job_id = %job_id, "Left wait list");
            // The leaving job may have been blocking the head of the lane.
            self.reassign(id).await;
        }
        Ok(removed)
    }

    async fn group(&self, id: ResourceGroupId) -> Result<ResourceGroup> {
        self.groups
            .get(id)
            .await?
            .ok_or_else(|| Error::ResourceGroupNotFound(id.to_string()))
    }

    async fn released(&self, group: &ResourceGroup, job_id: JobId) {
        info!(resource_group = %group.key, job_id = %job_id, "Released resource");
        publish(
            self.events.as_ref(),
            Event::ResourceReleased(ResourceReleasedPayload {
                resource_group_id: group.id,
                key: group.key.clone(),
                job_id,
                released_at: Utc::now(),
            }),
        )
        .await;
    }

    /// Re-evaluate the wait list after a change; the next sweep retries on failure.
    async fn reassign(&self, id: ResourceGroupId) {
        if let Err(e) = self.assign_resource(id).await {
            warn!(resource_group_id = %id, error = %e, "Failed to assign resource");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use cinder_core::job::When;
    use cinder_core::resource_group::ProcessMode;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_request_grants_free_group() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::OldestFirst).await;
        let job = harness.pending_job(Some(group.id)).await;

        harness.resource_groups().request_resource(&job).await.unwrap();

        let job = harness.job(job.id).await;
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.runner_id.is_none());
        assert_eq!(harness.holder(group.id).await, Some(job.id));
        assert!(harness.wait_list(group.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_request_waits_while_held() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::OldestFirst).await;
        let first = harness.pending_job(Some(group.id)).await;
        let second = harness.pending_job(Some(group.id)).await;
        let service = harness.resource_groups();

        service.request_resource(&first).await.unwrap();
        service.request_resource(&second).await.unwrap();

        assert_eq!(harness.job(second.id).await.status, JobStatus::WaitingForResource);
        assert_eq!(harness.holder(group.id).await, Some(first.id));
        assert_eq!(harness.wait_list(group.id).await, vec![second.id]);
    }

    #[tokio::test]
    async fn test_release_hands_over_to_next_waiter() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::OldestFirst).await;
        let first = harness.pending_job(Some(group.id)).await;
        let second = harness.pending_job(Some(group.id)).await;
        let service = harness.resource_groups();
        service.request_resource(&first).await.unwrap();
        service.request_resource(&second).await.unwrap();

        assert!(service.release_held_by(group.id, first.id).await.unwrap());

        assert_eq!(harness.holder(group.id).await, Some(second.id));
        assert_eq!(harness.job(second.id).await.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_release_held_by_other_job_is_ignored() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::OldestFirst).await;
        let holder = harness.pending_job(Some(group.id)).await;
        let service = harness.resource_groups();
        service.request_resource(&holder).await.unwrap();

        assert!(!service.release_held_by(group.id, JobId::new()).await.unwrap());
        assert_eq!(harness.holder(group.id).await, Some(holder.id));
    }

    #[tokio::test]
    async fn test_release_free_group_is_noop() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::Unordered).await;
        let mut events = harness.events.subscribe("resource_group.>").await.unwrap();
        let service = harness.resource_groups();

        assert_eq!(service.release(group.id).await.unwrap(), None);
        assert_eq!(service.release(group.id).await.unwrap(), None);

        // Nothing was announced for the no-op releases.
        let holder = harness.pending_job(Some(group.id)).await;
        service.request_resource(&holder).await.unwrap();
        let event = events.next().await.unwrap().unwrap();
        assert!(matches!(event, Event::ResourceGranted(_)));
    }

    #[tokio::test]
    async fn test_oldest_first_blocked_by_upcoming_job() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::OldestFirst).await;
        let upcoming = harness.created_job(Some(group.id)).await;
        harness.resource_groups().register(&upcoming).await.unwrap();
        let ready = harness.pending_job(Some(group.id)).await;

        harness.resource_groups().request_resource(&ready).await.unwrap();

        assert_eq!(harness.job(ready.id).await.status, JobStatus::WaitingForResource);
        assert!(harness.holder(group.id).await.is_none());
    }

    #[tokio::test]
    async fn test_newest_ready_first_skips_upcoming_job() {
        let harness = Harness::new();
        let group = harness
            .group("deploy-prod", ProcessMode::NewestReadyFirst)
            .await;
        let upcoming = harness.created_job(Some(group.id)).await;
        harness.resource_groups().register(&upcoming).await.unwrap();
        let ready = harness.pending_job(Some(group.id)).await;

        harness.resource_groups().request_resource(&ready).await.unwrap();

        assert_eq!(harness.holder(group.id).await, Some(ready.id));
    }

    #[tokio::test]
    async fn test_leave_unblocks_lane() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::OldestFirst).await;
        let upcoming = harness.created_job(Some(group.id)).await;
        let service = harness.resource_groups();
        service.register(&upcoming).await.unwrap();
        let ready = harness.pending_job(Some(group.id)).await;
        service.request_resource(&ready).await.unwrap();

        assert!(service.leave(group.id, upcoming.id).await.unwrap());

        assert_eq!(harness.holder(group.id).await, Some(ready.id));
    }

    #[tokio::test]
    async fn test_assign_prunes_finished_jobs() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::OldestFirst).await;
        let finished = harness.created_job(Some(group.id)).await;
        let service = harness.resource_groups();
        service.register(&finished).await.unwrap();
        harness.set_status(finished.id, JobStatus::Canceled).await;

        assert_eq!(service.assign_resource(group.id).await.unwrap(), None);
        assert!(harness.wait_list(group.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_unplayed_manual_job_not_registered() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::OldestFirst).await;
        let mut manual = harness.created_job(Some(group.id)).await;
        manual.when = When::Manual;

        harness.resource_groups().register(&manual).await.unwrap();

        assert!(harness.wait_list(group.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_unplayed_manual_entry_does_not_block_lane() {
        let harness = Harness::new();
        let group = harness.group("deploy-prod", ProcessMode::OldestFirst).await;
        let mut manual = harness.created_job(Some(group.id)).await;
        manual.when = When::Manual;
        harness.stores.jobs.update(&manual).await.unwrap();
        harness
            .stores
            .resource_groups
            .enqueue(group.id, manual.id, manual.pipeline_id, manual.created_at)
            .await
            .unwrap();
        let ready = harness.pending_job(Some(group.id)).await;

        harness.resource_groups().request_resource(&ready).await.unwrap();

        assert_eq!(harness.holder(group.id).await, Some(ready.id));
        assert!(!harness.wait_list(group.id).await.contains(&manual.id));
    }

    #[tokio::test]
    async fn test_assign_unknown_group() {
        let harness = Harness::new();
        let err = harness
            .resource_groups()
            .assign_resource(ResourceGroupId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceGroupNotFound(_)));
    }
}
