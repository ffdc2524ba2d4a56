//! Repository implementations for PostgreSQL.

mod creation_request;
mod job;
mod lease;
mod pipeline;
mod resource_group;

pub use creation_request::PgCreationRequestRepository;
pub use job::PgJobRepository;
pub use lease::PgLeaseStore;
pub use pipeline::PgPipelineRepository;
pub use resource_group::PgResourceGroupRepository;
