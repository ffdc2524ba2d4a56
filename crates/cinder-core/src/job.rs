//! Job (build) types and the job status state machine.

use crate::ids::{JobId, PipelineId, ProjectId, ResourceGroupId, RunnerId};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default execution timeout applied when neither the job nor the project sets one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,
    pub pipeline_id: PipelineId,
    pub project_id: ProjectId,
    pub name: String,
    pub stage: String,
    pub stage_idx: u32,
    pub status: JobStatus,
    #[serde(default)]
    pub when: When,
    pub resource_group_id: Option<ResourceGroupId>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub protected: bool,
    pub timeout_secs: u64,
    pub failure_reason: Option<FailureReason>,
    pub runner_id: Option<RunnerId>,
    pub retried_from: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Optimistic lock counter, bumped by the repository on every update.
    #[serde(default)]
    pub lock_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Pending,
    WaitingForResource,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Created,
        JobStatus::Pending,
        JobStatus::WaitingForResource,
        JobStatus::Running,
        JobStatus::Success,
        JobStatus::Failed,
        JobStatus::Canceled,
        JobStatus::Skipped,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Canceled | JobStatus::Skipped
        )
    }

    /// Statuses counted against project job-activity limits.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::WaitingForResource | JobStatus::Running
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Pending => "pending",
            JobStatus::WaitingForResource => "waiting_for_resource",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Serialization(format!("unknown job status `{}`", s)))
    }
}

/// When a job is started relative to its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum When {
    #[default]
    OnSuccess,
    /// Stays `created` until played; never blocks its stage.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    UnknownFailure,
    ScriptFailure,
    ApiFailure,
    StuckOrTimeoutFailure,
    RunnerSystemFailure,
    JobExecutionTimeout,
    ConfigError,
    SizeLimitExceeded,
    JobActivityLimitExceeded,
    NoMatchingRunner,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::UnknownFailure => "unknown_failure",
            FailureReason::ScriptFailure => "script_failure",
            FailureReason::ApiFailure => "api_failure",
            FailureReason::StuckOrTimeoutFailure => "stuck_or_timeout_failure",
            FailureReason::RunnerSystemFailure => "runner_system_failure",
            FailureReason::JobExecutionTimeout => "job_execution_timeout",
            FailureReason::ConfigError => "config_error",
            FailureReason::SizeLimitExceeded => "size_limit_exceeded",
            FailureReason::JobActivityLimitExceeded => "job_activity_limit_exceeded",
            FailureReason::NoMatchingRunner => "no_matching_runner",
        }
    }

    /// Human readable description shown next to a failed job or pipeline.
    pub fn description(&self) -> &'static str {
        match self {
            FailureReason::UnknownFailure => "There is an unknown failure, please try again",
            FailureReason::ScriptFailure => "There has been a script failure",
            FailureReason::ApiFailure => "There has been an API failure, please try again",
            FailureReason::StuckOrTimeoutFailure => {
                "There has been a timeout failure or the job got stuck"
            }
            FailureReason::RunnerSystemFailure => "There has been a runner system failure",
            FailureReason::JobExecutionTimeout => {
                "The job failed to complete within the configured timeout"
            }
            FailureReason::ConfigError => "The pipeline configuration is invalid",
            FailureReason::SizeLimitExceeded => "The pipeline size limit was exceeded",
            FailureReason::JobActivityLimitExceeded => "The job activity limit was exceeded",
            FailureReason::NoMatchingRunner => "No matching runner available",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| Error::Serialization(format!("unknown failure reason `{}`", s)))
    }
}

/// Events accepted by the job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Enqueue,
    RequestResource,
    Run,
    Succeed,
    Drop(FailureReason),
    Cancel,
    Skip,
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Enqueue => "enqueue",
            JobEvent::RequestResource => "request_resource",
            JobEvent::Run => "run",
            JobEvent::Succeed => "succeed",
            JobEvent::Drop(_) => "drop",
            JobEvent::Cancel => "cancel",
            JobEvent::Skip => "skip",
        }
    }

    /// Target status for this event from `from`, or `None` if the transition is not allowed.
    pub fn target(&self, from: JobStatus) -> Option<JobStatus> {
        use JobStatus::*;

        match (self, from) {
            (JobEvent::Enqueue, Created) => Some(Pending),
            (JobEvent::RequestResource, Created | Pending) => Some(WaitingForResource),
            (JobEvent::Run, Pending | WaitingForResource) => Some(Running),
            (JobEvent::Succeed, Running) => Some(Success),
            (JobEvent::Drop(_), Created | Pending | WaitingForResource | Running) => Some(Failed),
            (JobEvent::Cancel, Created | Pending | WaitingForResource | Running) => Some(Canceled),
            (JobEvent::Skip, Created) => Some(Skipped),
            _ => None,
        }
    }
}

/// Outcome of a successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl Transition {
    /// The job left `running` for a terminal status and must give back its resource.
    pub fn releases_resource(&self) -> bool {
        self.from == JobStatus::Running && self.to.is_terminal()
    }
}

impl Job {
    /// Apply a state machine event, updating timestamps and the failure reason.
    pub fn fire(&mut self, event: JobEvent, now: DateTime<Utc>) -> Result<Transition> {
        let from = self.status;
        let to = event.target(from).ok_or(Error::InvalidTransition {
            event: event.name(),
            from,
        })?;

        if to == JobStatus::WaitingForResource && self.resource_group_id.is_none() {
            return Err(Error::MissingResourceGroup(self.id.to_string()));
        }

        match to {
            JobStatus::Pending | JobStatus::WaitingForResource => {
                self.queued_at.get_or_insert(now);
            }
            JobStatus::Running => self.started_at = Some(now),
            _ => {}
        }
        if to.is_terminal() {
            self.finished_at = Some(now);
        }
        if let JobEvent::Drop(reason) = event {
            self.failure_reason = Some(reason);
        }

        self.status = to;
        Ok(Transition { from, to })
    }

    pub fn enqueue(&mut self, now: DateTime<Utc>) -> Result<Transition> {
        self.fire(JobEvent::Enqueue, now)
    }

    pub fn request_resource(&mut self, now: DateTime<Utc>) -> Result<Transition> {
        self.fire(JobEvent::RequestResource, now)
    }

    pub fn run(&mut self, now: DateTime<Utc>) -> Result<Transition> {
        self.fire(JobEvent::Run, now)
    }

    pub fn succeed(&mut self, now: DateTime<Utc>) -> Result<Transition> {
        self.fire(JobEvent::Succeed, now)
    }

    pub fn drop_with(&mut self, reason: FailureReason, now: DateTime<Utc>) -> Result<Transition> {
        self.fire(JobEvent::Drop(reason), now)
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<Transition> {
        self.fire(JobEvent::Cancel, now)
    }

    pub fn skip(&mut self, now: DateTime<Utc>) -> Result<Transition> {
        self.fire(JobEvent::Skip, now)
    }

    pub fn with_resource_group(&self) -> bool {
        self.resource_group_id.is_some()
    }

    /// A manual job nobody has played yet.
    pub fn is_unplayed_manual(&self) -> bool {
        self.when == When::Manual && self.status == JobStatus::Created
    }

    pub fn timeout(&self) -> Duration {
        Duration::seconds(self.timeout_secs.min(i64::MAX as u64) as i64)
    }

    /// A running job whose execution exceeded its timeout.
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.started_at) {
            (JobStatus::Running, Some(started)) => now - started > self.timeout(),
            _ => false,
        }
    }

    /// A pending job that no runner picked up within `pending_timeout`.
    pub fn is_stuck_pending(&self, now: DateTime<Utc>, pending_timeout: Duration) -> bool {
        match (self.status, self.queued_at) {
            (JobStatus::Pending, Some(queued)) => now - queued > pending_timeout,
            _ => false,
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }

    /// Build a fresh `created` copy of a finished job. The original is left untouched.
    pub fn retry(&self, now: DateTime<Utc>) -> Result<Job> {
        if !matches!(
            self.status,
            JobStatus::Success | JobStatus::Failed | JobStatus::Canceled
        ) {
            return Err(Error::InvalidTransition {
                event: "retry",
                from: self.status,
            });
        }

        Ok(Job {
            id: JobId::new(),
            status: JobStatus::Created,
            failure_reason: None,
            runner_id: None,
            retried_from: Some(self.id),
            created_at: now,
            queued_at: None,
            started_at: None,
            finished_at: None,
            lock_version: 0,
            ..self.clone()
        })
    }
}
