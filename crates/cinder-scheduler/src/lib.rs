//! Resource-group scheduling for Cinder.
//!
//! Jobs that share a resource group run one at a time, in the order chosen by
//! the group's process mode. This crate creates pipelines, advances them stage
//! by stage, grants and releases resource groups, hands runnable jobs to
//! runners and periodically sweeps for waiting or stuck jobs.

pub mod builds;
pub mod chain;
pub mod config;
pub mod creation;
pub mod processing;
pub mod queue;
pub mod resource_groups;
pub mod scheduler;
pub mod status;
pub mod stores;
pub mod transitions;
pub mod worker;

#[cfg(test)]
mod testing;

pub use builds::BuildService;
pub use chain::{Chain, ChainExtension, Command};
pub use config::{LogFormat, SchedulerConfig};
pub use creation::PipelineCreationService;
pub use processing::PipelineProcessor;
pub use queue::RunnerQueue;
pub use resource_groups::ResourceGroupService;
pub use scheduler::Scheduler;
pub use status::PipelineStatusUpdater;
pub use stores::Stores;
pub use transitions::JobTransitions;
pub use worker::{SchedulerWorker, SweepReport};
