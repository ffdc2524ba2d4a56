//! Resource groups and their process-mode dequeue policies.
//!
//! A resource group is a mutual-exclusion lane: at most one job holds it at a
//! time. Jobs that declare the group are registered on its wait list when
//! their pipeline is created and become eligible once they reach
//! `waiting_for_resource`. The process mode decides which waiting job is
//! granted the resource next.

use crate::ids::{JobId, PipelineId, ProjectId, ResourceGroupId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResourceGroup {
    pub id: ResourceGroupId,
    pub project_id: ProjectId,
    pub key: String,
    pub process_mode: ProcessMode,
    pub description: Option<String>,
    /// Job currently holding the resource.
    pub holder: Option<JobId>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ResourceGroup {
    pub fn new(project_id: ProjectId, key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: ResourceGroupId::new(),
            project_id,
            key: key.into(),
            process_mode: ProcessMode::default(),
            description: None,
            holder: None,
            acquired_at: None,
            created_at: now,
        }
    }

    pub fn is_free(&self) -> bool {
        self.holder.is_none()
    }

    pub fn free_slots(&self) -> usize {
        usize::from(self.is_free())
    }
}

/// Dequeue policy for a resource group's wait list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMode {
    /// Any waiting job may be granted; no fairness guarantee.
    #[default]
    Unordered,
    /// Strict FIFO by enqueue time. An upcoming job at the head blocks the lane.
    OldestFirst,
    /// Strict LIFO by enqueue time. Older waiters may starve.
    NewestFirst,
    /// Newest job that is already waiting; upcoming jobs never block.
    NewestReadyFirst,
}

impl ProcessMode {
    pub const ALL: [ProcessMode; 4] = [
        ProcessMode::Unordered,
        ProcessMode::OldestFirst,
        ProcessMode::NewestFirst,
        ProcessMode::NewestReadyFirst,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessMode::Unordered => "unordered",
            ProcessMode::OldestFirst => "oldest_first",
            ProcessMode::NewestFirst => "newest_first",
            ProcessMode::NewestReadyFirst => "newest_ready_first",
        }
    }

    /// Pick the job to grant next, if any.
    ///
    /// `candidates` is the wait list in storage order. Nothing is selected
    /// when `free_slots` is zero.
    pub fn select(&self, candidates: &[Candidate], free_slots: usize) -> Option<JobId> {
        if free_slots == 0 {
            return None;
        }

        match self {
            ProcessMode::Unordered => select_unordered(candidates),
            ProcessMode::OldestFirst => select_oldest_first(candidates),
            ProcessMode::NewestFirst => select_newest_first(candidates),
            ProcessMode::NewestReadyFirst => select_newest_ready_first(candidates),
        }
    }
}

impl fmt::Display for ProcessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ProcessMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| Error::Serialization(format!("unknown process mode `{}`", s)))
    }
}

fn select_unordered(candidates: &[Candidate]) -> Option<JobId> {
    candidates.iter().find(|c| c.ready).map(|c| c.job_id)
}

fn select_oldest_first(candidates: &[Candidate]) -> Option<JobId> {
    candidates
        .iter()
        .min_by_key(|c| c.order_key())
        .filter(|c| c.ready)
        .map(|c| c.job_id)
}

fn select_newest_first(candidates: &[Candidate]) -> Option<JobId> {
    candidates
        .iter()
        .max_by_key(|c| c.order_key())
        .filter(|c| c.ready)
        .map(|c| c.job_id)
}

fn select_newest_ready_first(candidates: &[Candidate]) -> Option<JobId> {
    candidates
        .iter()
        .filter(|c| c.ready)
        .max_by_key(|c| c.order_key())
        .map(|c| c.job_id)
}

/// Registration of a job on a resource group's wait list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WaitEntry {
    pub job_id: JobId,
    pub pipeline_id: PipelineId,
    pub enqueued_at: DateTime<Utc>,
    /// Tie-breaker for entries enqueued within the same instant, assigned by the store.
    pub sequence: u64,
}

/// A wait list entry annotated with the job's readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub job_id: JobId,
    pub enqueued_at: DateTime<Utc>,
    pub sequence: u64,
    /// The job is in `waiting_for_resource`. Otherwise it is still upcoming.
    pub ready: bool,
}

impl Candidate {
    pub fn from_entry(entry: &WaitEntry, ready: bool) -> Self {
        Self {
            job_id: entry.job_id,
            enqueued_at: entry.enqueued_at,
            sequence: entry.sequence,
            ready,
        }
    }

    fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.enqueued_at, self.sequence)
    }
}
