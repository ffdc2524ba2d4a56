//! Runner capabilities used to match runners with jobs.

use crate::ids::RunnerId;
use crate::job::Job;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Runner {
    pub id: RunnerId,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_run_untagged")]
    pub run_untagged: bool,
    #[serde(default)]
    pub access_level: AccessLevel,
}

fn default_run_untagged() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    NotProtected,
    /// Only picks jobs running for protected refs.
    RefProtected,
}

impl Runner {
    pub fn new(tags: Vec<String>) -> Self {
        Self {
            id: RunnerId::new(),
            description: None,
            tags,
            run_untagged: true,
            access_level: AccessLevel::NotProtected,
        }
    }

    /// Check whether this runner may execute `job`.
    pub fn can_pick(&self, job: &Job) -> bool {
        self.matches_tags(&job.tags) && self.matches_protection(job.protected)
    }

    fn matches_tags(&self, job_tags: &[String]) -> bool {
        if job_tags.is_empty() {
            return self.run_untagged;
        }
        job_tags.iter().all(|tag| self.tags.contains(tag))
    }

    fn matches_protection(&self, protected: bool) -> bool {
        match self.access_level {
            AccessLevel::NotProtected => true,
            AccessLevel::RefProtected => protected,
        }
    }
}
