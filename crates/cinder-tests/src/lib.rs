//! Integration test infrastructure for Cinder.
//!
//! Scenario tests run the scheduler over the in-memory store and the
//! in-process event bus through [`TestScheduler`]. Tests against real
//! PostgreSQL and NATS use testcontainers and are gated behind the
//! `integration` feature.
//!
//! # Usage
//!
//! ```ignore
//! use cinder_tests::{TestScheduler, fixtures};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let scheduler = TestScheduler::new();
//!     let request = scheduler.create(fixtures::DEPLOY_PROD).await;
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::TestContext;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,cinder_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
