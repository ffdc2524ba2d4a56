//! Repository handles shared by the scheduler services.

use cinder_core::ports::{
    CreationRequestRepository, JobRepository, LeaseStore, PipelineRepository,
    ResourceGroupRepository,
};
use cinder_db::{Database, MemoryStore};
use std::sync::Arc;

/// One handle per persistence port.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobRepository>,
    pub pipelines: Arc<dyn PipelineRepository>,
    pub resource_groups: Arc<dyn ResourceGroupRepository>,
    pub creation_requests: Arc<dyn CreationRequestRepository>,
    pub leases: Arc<dyn LeaseStore>,
}

impl Stores {
    /// Back every port with a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }

    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            jobs: store.clone(),
            pipelines: store.clone(),
            resource_groups: store.clone(),
            creation_requests: store.clone(),
            leases: store,
        }
    }

    pub fn postgres(db: &Database) -> Self {
        Self {
            jobs: Arc::new(db.jobs()),
            pipelines: Arc::new(db.pipelines()),
            resource_groups: Arc::new(db.resource_groups()),
            creation_requests: Arc::new(db.creation_requests()),
            leases: Arc::new(db.leases()),
        }
    }
}
