//! Base steps of the pipeline creation chain.

use async_trait::async_trait;
use chrono::Utc;
use cinder_core::ci_config::CiConfig;
use cinder_core::ids::{JobId, PipelineId};
use cinder_core::interpolation::InterpolationContext;
use cinder_core::job::{FailureReason, Job, JobStatus};
use cinder_core::pipeline::Pipeline;
use cinder_core::ports::{PipelineRepository, ResourceGroupRepository};
use cinder_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Context, HaltReason, JobSeed, Step};
use crate::processing::PipelineProcessor;
use crate::resource_groups::ResourceGroupService;

/// Initialise the pipeline from the command.
pub struct Build;

#[async_trait]
impl Step for Build {
    fn name(&self) -> &'static str {
        "build"
    }

    async fn perform(&self, ctx: &mut Context) -> Result<()> {
        let command = &ctx.command;
        ctx.pipeline = Some(Pipeline {
            id: PipelineId::new(),
            project_id: command.project_id,
            git_ref: command.git_ref.clone(),
            sha: command.sha.clone(),
            source: command.source,
            status: JobStatus::Created,
            failure_reason: None,
            yaml_errors: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        });
        Ok(())
    }
}

pub struct ConfigContent;

#[async_trait]
impl Step for ConfigContent {
    fn name(&self) -> &'static str {
        "config_content"
    }

    async fn perform(&self, ctx: &mut Context) -> Result<()> {
        let missing = ctx
            .command
            .config_content
            .as_deref()
            .is_none_or(|content| content.trim().is_empty());
        if missing {
            ctx.halt(HaltReason::new("Missing CI config file"));
        }
        Ok(())
    }
}

/// Parse and validate the CI YAML.
pub struct ConfigProcess;

#[async_trait]
impl Step for ConfigProcess {
    fn name(&self) -> &'static str {
        "config_process"
    }

    async fn perform(&self, ctx: &mut Context) -> Result<()> {
        let content = ctx.command.config_content.as_deref().unwrap_or_default();

        match CiConfig::parse(content) {
            Ok(config) => {
                debug!(jobs = config.jobs.len(), stages = config.stages.len(), "Parsed CI config");
                ctx.config = Some(config);
            }
            Err(Error::InvalidConfig(message)) => {
                ctx.halt(HaltReason::drop_with(message, FailureReason::ConfigError));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

/// Keep only the job requested by a chat command.
pub struct RemoveUnwantedChatJobs;

#[async_trait]
impl Step for RemoveUnwantedChatJobs {
    fn name(&self) -> &'static str {
        "remove_unwanted_chat_jobs"
    }

    async fn perform(&self, ctx: &mut Context) -> Result<()> {
        let Some(wanted) = ctx.command.chat_job.clone() else {
            return Ok(());
        };
        if let Some(config) = ctx.config.as_mut() {
            config.jobs.retain(|job| job.name == wanted);
        }
        Ok(())
    }
}

/// Turn job definitions into seeds, expanding resource group keys.
pub struct Seed {
    default_timeout_secs: u64,
}

impl Seed {
    pub fn new(default_timeout_secs: u64) -> Self {
        Self {
            default_timeout_secs,
        }
    }
}

#[async_trait]
impl Step for Seed {
    fn name(&self) -> &'static str {
        "seed"
    }

    async fn perform(&self, ctx: &mut Context) -> Result<()> {
        let config = ctx.config()?;
        let command = &ctx.command;
        let mut seeds = Vec::with_capacity(config.jobs.len());

        for job in &config.jobs {
            let stage_idx = config.stage_index(&job.stage).ok_or_else(|| {
                Error::Internal(format!("stage {} of job {} is unknown", job.stage, job.name))
            })?;

            let resource_group_key = match &job.resource_group {
                Some(key) => {
                    let variables = InterpolationContext::new()
                        .with_predefined("CI_COMMIT_REF_NAME", command.git_ref.as_str())
                        .with_predefined("CI_JOB_NAME", job.name.as_str())
                        .with_predefined("CI_PROJECT_ID", command.project_id.to_string())
                        .with_predefined("CI_PIPELINE_SOURCE", command.source.as_str())
                        .with_variables(&config.variables)
                        .with_variables(&job.variables)
                        .with_variables(&command.variables);
                    let expanded = variables.expand(key);
                    if expanded.trim().is_empty() {
                        warn!(job = %job.name, key = %key, "Resource group key expanded to nothing");
                        None
                    } else {
                        Some(expanded)
                    }
                }
                None => None,
            };

            seeds.push(JobSeed {
                name: job.name.clone(),
                stage: job.stage.clone(),
                stage_idx,
                when: job.when,
                tags: job.tags.clone(),
                timeout_secs: job.timeout_secs.unwrap_or(self.default_timeout_secs),
                resource_group_key,
            });
        }

        ctx.seeds = seeds;
        Ok(())
    }
}

pub struct Populate;

#[async_trait]
impl Step for Populate {
    fn name(&self) -> &'static str {
        "populate"
    }

    async fn perform(&self, ctx: &mut Context) -> Result<()> {
        if ctx.seeds.is_empty() {
            ctx.halt(HaltReason::new("No stages / jobs for this pipeline."));
        }
        Ok(())
    }
}

/// Find or create every resource group the seeds declare.
pub struct EnsureResourceGroups {
    groups: Arc<dyn ResourceGroupRepository>,
}

impl EnsureResourceGroups {
    pub const NAME: &'static str = "ensure_resource_groups";

    pub fn new(groups: Arc<dyn ResourceGroupRepository>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl Step for EnsureResourceGroups {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn perform(&self, ctx: &mut Context) -> Result<()> {
        let project_id = ctx.command.project_id;
        let keys: Vec<String> = ctx
            .seeds
            .iter()
            .filter_map(|seed| seed.resource_group_key.clone())
            .collect();

        for key in keys {
            if ctx.resource_groups.contains_key(&key) {
                continue;
            }
            let group = self.groups.find_or_create(project_id, &key).await?;
            ctx.resource_groups.insert(key, group.id);
        }
        Ok(())
    }
}

/// Persist the pipeline with its jobs and register them on their wait lists.
pub struct Create {
    pipelines: Arc<dyn PipelineRepository>,
    resource_groups: ResourceGroupService,
}

impl Create {
    pub fn new(pipelines: Arc<dyn PipelineRepository>, resource_groups: ResourceGroupService) -> Self {
        Self {
            pipelines,
            resource_groups,
        }
    }
}

#[async_trait]
impl Step for Create {
    fn name(&self) -> &'static str {
        "create"
    }

    async fn perform(&self, ctx: &mut Context) -> Result<()> {
        let pipeline = ctx.pipeline()?.clone();
        let now = Utc::now();

        let mut jobs = Vec::with_capacity(ctx.seeds.len());
        for seed in &ctx.seeds {
            let resource_group_id = match &seed.resource_group_key {
                Some(key) => Some(*ctx.resource_groups.get(key).ok_or_else(|| {
                    Error::Internal(format!("resource group {} was not ensured", key))
                })?),
                None => None,
            };

            jobs.push(Job {
                id: JobId::new(),
                pipeline_id: pipeline.id,
                project_id: pipeline.project_id,
                name: seed.name.clone(),
                stage: seed.stage.clone(),
                stage_idx: seed.stage_idx,
                status: JobStatus::Created,
                when: seed.when,
                resource_group_id,
                tags: seed.tags.clone(),
                protected: ctx.command.protected,
                timeout_secs: seed.timeout_secs,
                failure_reason: None,
                runner_id: None,
                retried_from: None,
                created_at: now,
                queued_at: None,
                started_at: None,
                finished_at: None,
                lock_version: 0,
            });
        }

        self.pipelines.create(&pipeline, &jobs).await?;
        ctx.persisted = true;

        for job in &jobs {
            self.resource_groups.register(job).await?;
        }

        info!(
            pipeline_id = %pipeline.id,
            project_id = %pipeline.project_id,
            jobs = jobs.len(),
            "Created pipeline"
        );
        ctx.jobs = jobs;
        Ok(())
    }
}

/// Start the first stage.
pub struct Process {
    processor: PipelineProcessor,
}

impl Process {
    pub fn new(processor: PipelineProcessor) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl Step for Process {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn perform(&self, ctx: &mut Context) -> Result<()> {
        let pipeline_id = ctx.pipeline()?.id;
        let status = self.processor.process(pipeline_id).await?;

        if let Some(pipeline) = ctx.pipeline.as_mut() {
            pipeline.status = status;
        }
        Ok(())
    }
}
