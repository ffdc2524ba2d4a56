//! Wiring of the scheduler services.

use cinder_core::Result;
use cinder_core::ports::EventBus;
use std::sync::Arc;
use tracing::info;

use crate::builds::BuildService;
use crate::chain::{Chain, ChainExtension};
use crate::config::SchedulerConfig;
use crate::creation::PipelineCreationService;
use crate::processing::PipelineProcessor;
use crate::queue::RunnerQueue;
use crate::resource_groups::ResourceGroupService;
use crate::status::PipelineStatusUpdater;
use crate::stores::Stores;
use crate::transitions::JobTransitions;
use crate::worker::SchedulerWorker;

/// All scheduler services built over one set of stores and one event bus.
pub struct Scheduler {
    stores: Stores,
    events: Arc<dyn EventBus>,
    resource_groups: ResourceGroupService,
    processor: PipelineProcessor,
    builds: BuildService,
    queue: RunnerQueue,
    creation: PipelineCreationService,
    worker: SchedulerWorker,
}

impl Scheduler {
    pub fn new(stores: Stores, events: Arc<dyn EventBus>, config: &SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let transitions = JobTransitions::new(stores.jobs.clone(), events.clone());
        let statuses =
            PipelineStatusUpdater::new(stores.jobs.clone(), stores.pipelines.clone(), events.clone());
        let resource_groups = ResourceGroupService::new(
            stores.resource_groups.clone(),
            stores.jobs.clone(),
            transitions.clone(),
            statuses.clone(),
            events.clone(),
        );
        let processor = PipelineProcessor::new(
            stores.jobs.clone(),
            transitions.clone(),
            resource_groups.clone(),
            statuses.clone(),
        );
        let builds = BuildService::new(
            stores.jobs.clone(),
            transitions.clone(),
            resource_groups.clone(),
            processor.clone(),
        );
        let queue = RunnerQueue::new(stores.jobs.clone(), transitions)
            .with_fair_scheduling(config.fair_scheduling)
            .with_status_updates(statuses);

        let chain = Chain::base(&stores, resource_groups.clone(), processor.clone(), config)
            .with_extension(ChainExtension::quotas(&stores, config));
        let creation =
            PipelineCreationService::new(chain, stores.creation_requests.clone(), events.clone());

        let worker = SchedulerWorker::new(&stores, resource_groups.clone(), builds.clone(), config)?;

        info!(
            schedule = %config.schedule,
            fair_scheduling = config.fair_scheduling,
            "Scheduler services ready"
        );

        Ok(Self {
            stores,
            events,
            resource_groups,
            processor,
            builds,
            queue,
            creation,
            worker,
        })
    }

    /// Name the worker's sweep lease owner.
    pub fn with_worker_owner(mut self, owner: impl Into<String>) -> Self {
        self.worker = self.worker.with_owner(owner);
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn events(&self) -> &Arc<dyn EventBus> {
        &self.events
    }

    pub fn resource_groups(&self) -> &ResourceGroupService {
        &self.resource_groups
    }

    pub fn processor(&self) -> &PipelineProcessor {
        &self.processor
    }

    pub fn builds(&self) -> &BuildService {
        &self.builds
    }

    pub fn queue(&self) -> &RunnerQueue {
        &self.queue
    }

    pub fn creation(&self) -> &PipelineCreationService {
        &self.creation
    }

    pub fn worker(&self) -> &SchedulerWorker {
        &self.worker
    }
}
