//! Cinder Core
//!
//! Core domain types, traits, and error handling for the Cinder
//! resource-group scheduler. This crate has minimal dependencies and defines
//! the shared vocabulary (jobs, pipelines, resource groups, events, ports)
//! used across all other crates.

pub mod ci_config;
pub mod error;
pub mod events;
pub mod ids;
pub mod interpolation;
pub mod job;
pub mod pipeline;
pub mod ports;
pub mod resource_group;
pub mod runner;

pub use error::{Error, Result};
pub use ids::*;
