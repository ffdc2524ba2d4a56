//! Configuration for the NATS event bus.

use std::time::Duration;

/// Subjects captured by the scheduler event stream.
pub const STREAM_SUBJECTS: [&str; 3] = ["pipeline.>", "job.>", "resource_group.>"];

/// Configuration for the NATS event bus.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URLs (comma-separated for cluster).
    pub urls: Vec<String>,
    /// Stream name for JetStream.
    pub stream_name: String,
    /// Connection timeout.
    pub connection_timeout: Duration,
    /// Request timeout for JetStream operations.
    pub request_timeout: Duration,
    /// Maximum delivery attempts per message.
    pub max_deliver: i64,
    /// How long a delivered message may stay unacknowledged.
    pub ack_wait: Duration,
    /// Message retention period.
    pub max_age: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: vec!["nats://localhost:4222".to_string()],
            stream_name: "CINDER_EVENTS".to_string(),
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            max_deliver: 5,
            ack_wait: Duration::from_secs(30),
            max_age: Duration::from_secs(86400 * 3), // 3 days
        }
    }
}

impl NatsConfig {
    /// Create a new config with a single URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    /// Set multiple server URLs for cluster support.
    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    /// Set the stream name.
    pub fn with_stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream_name = name.into();
        self
    }

    /// Set max delivery attempts.
    pub fn with_max_deliver(mut self, max: i64) -> Self {
        self.max_deliver = max;
        self
    }

    /// Set the retention period.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}
