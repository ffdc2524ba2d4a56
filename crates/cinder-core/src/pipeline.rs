//! Pipeline and pipeline creation request types.

use crate::ids::{CreationRequestId, PipelineId, ProjectId};
use crate::job::{FailureReason, Job, JobStatus};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Pipeline {
    pub id: PipelineId,
    pub project_id: ProjectId,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub source: PipelineSource,
    pub status: JobStatus,
    pub failure_reason: Option<FailureReason>,
    pub yaml_errors: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    /// Apply a newly composed status, maintaining the timestamps.
    ///
    /// Returns `true` when the status actually changed.
    pub fn set_status(&mut self, status: JobStatus, now: DateTime<Utc>) -> bool {
        if self.status == status {
            return false;
        }
        if status == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = status;
        true
    }

    /// Mark the pipeline failed with a reason, e.g. on a config error.
    pub fn drop_with(&mut self, reason: FailureReason, now: DateTime<Utc>) {
        self.failure_reason = Some(reason);
        self.set_status(JobStatus::Failed, now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineSource {
    Push,
    Web,
    Trigger,
    Schedule,
    Api,
    Chat,
    MergeRequestEvent,
}

impl PipelineSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineSource::Push => "push",
            PipelineSource::Web => "web",
            PipelineSource::Trigger => "trigger",
            PipelineSource::Schedule => "schedule",
            PipelineSource::Api => "api",
            PipelineSource::Chat => "chat",
            PipelineSource::MergeRequestEvent => "merge_request_event",
        }
    }
}

/// Compose a pipeline status from the statuses of its jobs.
///
/// Manual jobs that were never played are ignored.
pub fn composite_status<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> JobStatus {
    let statuses: Vec<JobStatus> = jobs
        .into_iter()
        .filter(|job| !job.is_unplayed_manual())
        .map(|job| job.status)
        .collect();

    if statuses.is_empty() {
        return JobStatus::Skipped;
    }

    let any = |status: JobStatus| statuses.contains(&status);

    if any(JobStatus::Running) {
        JobStatus::Running
    } else if any(JobStatus::Pending) {
        JobStatus::Pending
    } else if any(JobStatus::WaitingForResource) {
        JobStatus::WaitingForResource
    } else if any(JobStatus::Created) {
        // Some stage is finished while a later one is not yet enqueued.
        if statuses.iter().any(|s| s.is_terminal()) {
            JobStatus::Running
        } else {
            JobStatus::Created
        }
    } else if any(JobStatus::Failed) {
        JobStatus::Failed
    } else if any(JobStatus::Canceled) {
        JobStatus::Canceled
    } else if any(JobStatus::Success) {
        JobStatus::Success
    } else {
        JobStatus::Skipped
    }
}

/// Ephemeral record tracking an asynchronous pipeline creation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineCreationRequest {
    pub id: CreationRequestId,
    pub project_id: ProjectId,
    pub status: CreationStatus,
    pub error: Option<String>,
    pub pipeline_id: Option<PipelineId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineCreationRequest {
    pub fn new(project_id: ProjectId, now: DateTime<Utc>) -> Self {
        Self {
            id: CreationRequestId::new(),
            project_id,
            status: CreationStatus::Creating,
            error: None,
            pipeline_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn succeed(&mut self, pipeline_id: PipelineId, now: DateTime<Utc>) {
        self.status = CreationStatus::Succeeded;
        self.pipeline_id = Some(pipeline_id);
        self.error = None;
        self.updated_at = now;
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = CreationStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CreationStatus {
    Creating,
    Succeeded,
    Failed,
}

impl CreationStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, CreationStatus::Creating)
    }
}
