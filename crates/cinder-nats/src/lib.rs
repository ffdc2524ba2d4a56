//! Event bus implementations for Cinder.
//!
//! [`NatsEventBus`] publishes to a JetStream stream for multi-process
//! deployments; [`LocalEventBus`] fans events out in-process.

mod bus;
pub mod config;
mod local;
pub mod metrics;

pub use bus::{NatsEventBus, StreamInfo};
pub use config::NatsConfig;
pub use local::LocalEventBus;
pub use metrics::{BusMetrics, MetricsSnapshot};
