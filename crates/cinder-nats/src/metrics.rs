//! Counters for event bus observability.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the bus implementations.
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// Total events published.
    pub events_published: AtomicU64,
    /// Total events delivered to subscribers.
    pub events_received: AtomicU64,
    /// Total publish failures.
    pub publish_failures: AtomicU64,
    /// Events a slow subscriber missed.
    pub events_lagged: AtomicU64,
    /// Total bytes published.
    pub bytes_published: AtomicU64,
    /// Current connection state (0 = disconnected, 1 = connected).
    pub connected: AtomicU64,
}

impl BusMetrics {
    /// Create new metrics instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a successful publish.
    pub fn record_publish(&self, bytes: u64) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a publish failure.
    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delivered event.
    pub fn record_receive(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lagged(&self, skipped: u64) {
        self.events_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    /// Set connection state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            events_lagged: self.events_lagged.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed) == 1,
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub events_received: u64,
    pub publish_failures: u64,
    pub events_lagged: u64,
    pub bytes_published: u64,
    pub connected: bool,
}
