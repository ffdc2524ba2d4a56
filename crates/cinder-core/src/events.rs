//! Scheduler events and their bus subjects.

use crate::ids::*;
use crate::job::{FailureReason, JobStatus};
use crate::pipeline::CreationStatus;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// All events published by the Cinder scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Pipeline creation
    PipelineCreationChanged(PipelineCreationChangedPayload),

    // Status changes
    PipelineStatusChanged(PipelineStatusChangedPayload),
    JobStatusChanged(JobStatusChangedPayload),

    // Resource groups
    ResourceGranted(ResourceGrantedPayload),
    ResourceReleased(ResourceReleasedPayload),
}

impl Event {
    /// Returns the bus subject for this event.
    pub fn subject(&self) -> String {
        match self {
            Event::PipelineCreationChanged(p) => format!("pipeline.creation.{}", p.request_id),
            Event::PipelineStatusChanged(p) => format!("pipeline.{}.status", p.pipeline_id),
            Event::JobStatusChanged(p) => format!("job.{}.status", p.job_id),
            Event::ResourceGranted(p) => format!("resource_group.{}.granted", p.resource_group_id),
            Event::ResourceReleased(p) => {
                format!("resource_group.{}.released", p.resource_group_id)
            }
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Event::PipelineCreationChanged(p) => p.changed_at,
            Event::PipelineStatusChanged(p) => p.changed_at,
            Event::JobStatusChanged(p) => p.changed_at,
            Event::ResourceGranted(p) => p.granted_at,
            Event::ResourceReleased(p) => p.released_at,
        }
    }
}

/// Match a subject against a NATS-style pattern.
///
/// `*` matches exactly one token, `>` matches one or more trailing tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

// === Pipeline Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineCreationChangedPayload {
    pub request_id: CreationRequestId,
    pub project_id: ProjectId,
    pub status: CreationStatus,
    pub error: Option<String>,
    pub pipeline_id: Option<PipelineId>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineStatusChangedPayload {
    pub pipeline_id: PipelineId,
    pub project_id: ProjectId,
    pub from: JobStatus,
    pub to: JobStatus,
    pub changed_at: DateTime<Utc>,
}

// === Job Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobStatusChangedPayload {
    pub job_id: JobId,
    pub pipeline_id: PipelineId,
    pub name: String,
    pub from: JobStatus,
    pub to: JobStatus,
    pub failure_reason: Option<FailureReason>,
    pub runner_id: Option<RunnerId>,
    pub changed_at: DateTime<Utc>,
}

// === Resource Group Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResourceGrantedPayload {
    pub resource_group_id: ResourceGroupId,
    pub key: String,
    pub job_id: JobId,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResourceReleasedPayload {
    pub resource_group_id: ResourceGroupId,
    pub key: String,
    pub job_id: JobId,
    pub released_at: DateTime<Utc>,
}
