//! Pipeline creation chain.
//!
//! A pipeline is built by running an ordered list of steps over a shared
//! [`Context`]. Any step may halt the chain; the driver stops after the step
//! that halted and, when the halt asks for it, persists the pipeline as
//! failed so the user can see why it did not run.

mod limit;
mod steps;

pub use limit::{JobActivity, Size};
pub use steps::{
    Build, ConfigContent, ConfigProcess, Create, EnsureResourceGroups, Populate, Process,
    RemoveUnwantedChatJobs, Seed,
};

use async_trait::async_trait;
use chrono::Utc;
use cinder_core::ci_config::CiConfig;
use cinder_core::ids::{ProjectId, ResourceGroupId};
use cinder_core::job::{FailureReason, Job, When};
use cinder_core::pipeline::{Pipeline, PipelineSource};
use cinder_core::ports::PipelineRepository;
use cinder_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::SchedulerConfig;
use crate::processing::PipelineProcessor;
use crate::resource_groups::ResourceGroupService;
use crate::stores::Stores;

/// Request to create a pipeline.
#[derive(Debug, Clone)]
pub struct Command {
    pub project_id: ProjectId,
    pub git_ref: String,
    pub sha: String,
    pub source: PipelineSource,
    /// Raw CI YAML, if the ref has one.
    pub config_content: Option<String>,
    /// Pipeline variables, e.g. from a trigger or a schedule.
    pub variables: HashMap<String, String>,
    /// The ref is protected.
    pub protected: bool,
    /// Job requested through a chat command. Only that job is created.
    pub chat_job: Option<String>,
}

impl Command {
    pub fn new(
        project_id: ProjectId,
        git_ref: impl Into<String>,
        sha: impl Into<String>,
        source: PipelineSource,
    ) -> Self {
        Self {
            project_id,
            git_ref: git_ref.into(),
            sha: sha.into(),
            source,
            config_content: None,
            variables: HashMap::new(),
            protected: false,
            chat_job: None,
        }
    }

    pub fn with_config(mut self, content: impl Into<String>) -> Self {
        self.config_content = Some(content.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn with_chat_job(mut self, name: impl Into<String>) -> Self {
        self.source = PipelineSource::Chat;
        self.chat_job = Some(name.into());
        self
    }
}

/// A job to be created, with everything resolved except its resource group id.
#[derive(Debug, Clone)]
pub struct JobSeed {
    pub name: String,
    pub stage: String,
    pub stage_idx: u32,
    pub when: When,
    pub tags: Vec<String>,
    pub timeout_secs: u64,
    /// Resource group key after variable expansion.
    pub resource_group_key: Option<String>,
}

/// Why the chain stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaltReason {
    pub message: String,
    /// Failure reason recorded on the persisted pipeline.
    pub drop_reason: Option<FailureReason>,
    /// Persist the pipeline as failed so the error is visible.
    pub persist: bool,
}

impl HaltReason {
    /// Stop without persisting anything.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            drop_reason: None,
            persist: false,
        }
    }

    /// Stop and keep a failed pipeline with `reason`.
    pub fn drop_with(message: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            message: message.into(),
            drop_reason: Some(reason),
            persist: true,
        }
    }

    fn undefined(err: &Error) -> Self {
        Self::drop_with(
            format!("Undefined error ({})", err),
            FailureReason::UnknownFailure,
        )
    }
}

/// State shared by the chain steps.
#[derive(Debug)]
pub struct Context {
    pub command: Command,
    pub pipeline: Option<Pipeline>,
    pub config: Option<CiConfig>,
    pub seeds: Vec<JobSeed>,
    /// Resource group ids by key.
    pub resource_groups: HashMap<String, ResourceGroupId>,
    pub jobs: Vec<Job>,
    /// The pipeline exists in storage.
    pub persisted: bool,
    halt: Option<HaltReason>,
}

impl Context {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            pipeline: None,
            config: None,
            seeds: Vec::new(),
            resource_groups: HashMap::new(),
            jobs: Vec::new(),
            persisted: false,
            halt: None,
        }
    }

    /// Stop the chain after the current step. The first reason wins.
    pub fn halt(&mut self, reason: HaltReason) {
        self.halt.get_or_insert(reason);
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_some()
    }

    pub fn pipeline(&self) -> Result<&Pipeline> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| Error::Internal("pipeline not built".to_string()))
    }

    pub fn config(&self) -> Result<&CiConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| Error::Internal("config not processed".to_string()))
    }
}

/// One unit of pipeline creation work.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    /// Advance the context. Expected failures halt through `Context::halt`;
    /// an `Err` is treated as an unexpected failure.
    async fn perform(&self, ctx: &mut Context) -> Result<()>;
}

/// Result of running the chain.
#[derive(Debug)]
pub enum Outcome {
    Completed(Context),
    Halted { context: Context, reason: HaltReason },
}

/// Steps spliced into the chain before resource groups are created.
#[derive(Default)]
pub struct ChainExtension {
    steps: Vec<Box<dyn Step>>,
}

impl ChainExtension {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Pipeline size and project job activity quotas.
    pub fn quotas(stores: &Stores, config: &SchedulerConfig) -> Self {
        Self::new()
            .with_step(Size::new(config.max_jobs_per_pipeline))
            .with_step(JobActivity::new(
                stores.jobs.clone(),
                config.max_active_jobs_per_project,
            ))
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Ordered pipeline creation steps.
pub struct Chain {
    steps: Vec<Box<dyn Step>>,
    pipelines: Arc<dyn PipelineRepository>,
    processor: Option<PipelineProcessor>,
}

impl Chain {
    pub fn new(pipelines: Arc<dyn PipelineRepository>, steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            steps,
            pipelines,
            processor: None,
        }
    }

    /// Cancel the jobs of a pipeline that halts after it was created.
    pub fn with_processor(mut self, processor: PipelineProcessor) -> Self {
        self.processor = Some(processor);
        self
    }

    /// The standard chain, without extension steps.
    pub fn base(
        stores: &Stores,
        resource_groups: ResourceGroupService,
        processor: PipelineProcessor,
        config: &SchedulerConfig,
    ) -> Self {
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(Build),
            Box::new(ConfigContent),
            Box::new(ConfigProcess),
            Box::new(RemoveUnwantedChatJobs),
            Box::new(Seed::new(config.default_job_timeout_secs)),
            Box::new(Populate),
            Box::new(EnsureResourceGroups::new(stores.resource_groups.clone())),
            Box::new(Create::new(stores.pipelines.clone(), resource_groups)),
            Box::new(Process::new(processor.clone())),
        ];
        Self::new(stores.pipelines.clone(), steps).with_processor(processor)
    }

    /// Splice `extension` in front of `ensure_resource_groups`, or append it
    /// when the chain has no such step.
    pub fn with_extension(mut self, extension: ChainExtension) -> Self {
        let at = self
            .steps
            .iter()
            .position(|step| step.name() == EnsureResourceGroups::NAME)
            .unwrap_or(self.steps.len());
        self.steps.splice(at..at, extension.steps);
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub async fn perform(&self, mut ctx: Context) -> Outcome {
        for step in &self.steps {
            debug!(step = step.name(), "Performing chain step");

            if let Err(e) = step.perform(&mut ctx).await {
                error!(step = step.name(), error = %e, "Pipeline creation step failed");
                ctx.halt(HaltReason::undefined(&e));
            }

            if let Some(reason) = ctx.halt.take() {
                warn!(step = step.name(), reason = %reason.message, "Pipeline creation halted");
                self.persist_failure(&mut ctx, &reason).await;
                return Outcome::Halted {
                    context: ctx,
                    reason,
                };
            }
        }

        Outcome::Completed(ctx)
    }

    async fn persist_failure(&self, ctx: &mut Context, reason: &HaltReason) {
        if !reason.persist {
            return;
        }
        let Some(pipeline) = ctx.pipeline.as_mut() else {
            return;
        };

        let drop_reason = reason.drop_reason.unwrap_or(FailureReason::UnknownFailure);
        if matches!(
            drop_reason,
            FailureReason::ConfigError | FailureReason::UnknownFailure
        ) {
            pipeline.yaml_errors = Some(reason.message.clone());
        }
        pipeline.drop_with(drop_reason, Utc::now());

        if ctx.persisted {
            if let Some(processor) = &self.processor {
                if let Err(e) = processor.abandon(pipeline.id).await {
                    error!(
                        pipeline_id = %pipeline.id,
                        error = %e,
                        "Failed to cancel jobs of halted pipeline"
                    );
                }
            }
        }

        let result = if ctx.persisted {
            self.pipelines.update(pipeline).await
        } else {
            self.pipelines.create(pipeline, &[]).await
        };
        match result {
            Ok(()) => ctx.persisted = true,
            Err(e) => error!(
                pipeline_id = %pipeline.id,
                error = %e,
                "Failed to persist halted pipeline"
            ),
        }
    }
}
