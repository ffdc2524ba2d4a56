//! Error types for Cinder.

use crate::job::JobStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Lookup errors
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("Resource group not found: {0}")]
    ResourceGroupNotFound(String),

    #[error("Pipeline creation request not found: {0}")]
    CreationRequestNotFound(String),

    // State machine errors
    #[error("Cannot {event} job in status {from}")]
    InvalidTransition { event: &'static str, from: JobStatus },

    #[error("Job {0} is missing a resource group")]
    MissingResourceGroup(String),

    #[error("Stale object: {0} was modified concurrently")]
    StaleObject(String),

    // Config errors
    #[error("Invalid CI config: {0}")]
    InvalidConfig(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the operation may succeed when retried against fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StaleObject(_) | Error::Database(_) | Error::EventBus(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
