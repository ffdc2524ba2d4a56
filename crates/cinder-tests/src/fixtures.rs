//! Test fixtures for creating sample data.

use chrono::Utc;
use cinder_core::ids::{JobId, PipelineId, ProjectId, ResourceGroupId};
use cinder_core::job::{DEFAULT_TIMEOUT_SECS, Job, JobStatus, When};
use cinder_core::pipeline::{Pipeline, PipelineSource};
use cinder_core::runner::{AccessLevel, Runner};

/// One deploy job serialized through the `deploy-prod` resource group.
pub const DEPLOY_PROD: &str = r#"
deploy:
  stage: deploy
  script: ./deploy.sh
  resource_group: deploy-prod
"#;

/// A deploy with a manual rollback sharing its resource group.
pub const DEPLOY_WITH_ROLLBACK: &str = r#"
deploy:
  stage: deploy
  script: ./deploy.sh
  resource_group: deploy-prod

rollback:
  stage: deploy
  script: ./rollback.sh
  resource_group: deploy-prod
  when: manual
"#;

/// Build and test stages in front of a serialized deploy.
pub const BUILD_TEST_DEPLOY: &str = r#"
stages:
  - build
  - test
  - deploy

build:
  stage: build
  script: cargo build

test:
  stage: test
  script: cargo test

deploy:
  stage: deploy
  script: ./deploy.sh
  resource_group: deploy-prod
"#;

/// Resource group key built from predefined variables.
pub const INTERPOLATED_GROUP: &str = r#"
test:
  stage: test
  script: cargo test
  resource_group: $CI_COMMIT_REF_NAME-$CI_JOB_NAME
"#;

/// A job that needs a tagged runner.
pub const TAGGED_JOB: &str = r#"
build:
  stage: build
  script: make
  tags: [linux, docker]
"#;

pub const INVALID_YAML: &str = "deploy: [unclosed";

/// Factory for pipelines inserted directly through the repositories.
pub struct PipelineFixture;

impl PipelineFixture {
    pub fn new(project_id: ProjectId) -> Pipeline {
        Pipeline {
            id: PipelineId::new(),
            project_id,
            git_ref: "master".to_string(),
            sha: "0123456789abcdef".to_string(),
            source: PipelineSource::Push,
            status: JobStatus::Created,
            failure_reason: None,
            yaml_errors: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Factory for jobs inserted directly through the repositories.
pub struct JobFixture;

impl JobFixture {
    pub fn created(pipeline: &Pipeline, name: &str) -> Job {
        Job {
            id: JobId::new(),
            pipeline_id: pipeline.id,
            project_id: pipeline.project_id,
            name: name.to_string(),
            stage: "deploy".to_string(),
            stage_idx: 3,
            status: JobStatus::Created,
            when: When::OnSuccess,
            resource_group_id: None,
            tags: vec![],
            protected: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
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

    pub fn in_group(pipeline: &Pipeline, name: &str, group: ResourceGroupId) -> Job {
        Job {
            resource_group_id: Some(group),
            ..Self::created(pipeline, name)
        }
    }
}

/// Factory for runners.
pub struct RunnerFixture;

impl RunnerFixture {
    pub fn untagged() -> Runner {
        Runner::new(vec![])
    }

    pub fn tagged(tags: &[&str]) -> Runner {
        Runner {
            run_untagged: false,
            ..Runner::new(tags.iter().map(|tag| tag.to_string()).collect())
        }
    }

    pub fn protected_only() -> Runner {
        Runner {
            access_level: AccessLevel::RefProtected,
            ..Runner::new(vec![])
        }
    }
}

/// A single untagged build job.
pub const BUILD_ONLY: &str = r#"
build:
  stage: build
  script: make
"#;

/// One deploy job in the resource group `key`.
pub fn deploy_to(key: &str) -> String {
    format!("deploy:\n  stage: deploy\n  script: ./deploy.sh\n  resource_group: {}\n", key)
}
