//! In-process event bus backed by a tokio broadcast channel.

use async_trait::async_trait;
use cinder_core::events::{Event, subject_matches};
use cinder_core::ports::{EventBus, EventStream};
use cinder_core::Result;
use futures::stream;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::metrics::BusMetrics;

const DEFAULT_CAPACITY: usize = 1024;

/// Event bus for single-process deployments and tests.
///
/// Events published before a subscription is opened are not replayed.
#[derive(Clone)]
pub struct LocalEventBus {
    sender: broadcast::Sender<Event>,
    metrics: Arc<BusMetrics>,
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bus whose subscribers may fall `capacity` events behind.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let metrics = BusMetrics::new();
        metrics.set_connected(true);
        Self { sender, metrics }
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        let subject = event.subject();
        let bytes = serde_json::to_vec(&event)?.len() as u64;

        // A send error only means nobody is subscribed.
        let receivers = self.sender.send(event).unwrap_or(0);
        self.metrics.record_publish(bytes);
        debug!(subject = %subject, receivers, "Published event");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<EventStream> {
        let receiver = self.sender.subscribe();
        let pattern = pattern.to_string();
        let metrics = self.metrics.clone();

        let events = stream::unfold(receiver, move |mut receiver| {
            let pattern = pattern.clone();
            let metrics = metrics.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) if subject_matches(&pattern, &event.subject()) => {
                            metrics.record_receive();
                            return Some((Ok(event), receiver));
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(pattern = %pattern, skipped, "Subscriber lagged behind");
                            metrics.record_lagged(skipped);
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(Box::pin(events))
    }
}
