//! NATS JetStream event bus.

use async_nats::jetstream::{
    self, consumer::pull::Config as ConsumerConfig, stream::Config as StreamConfig,
};
use async_trait::async_trait;
use cinder_core::events::Event;
use cinder_core::ports::{EventBus, EventStream};
use cinder_core::{Error, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use crate::config::{NatsConfig, STREAM_SUBJECTS};
use crate::metrics::BusMetrics;

/// NATS-based event bus using JetStream for durability.
#[derive(Clone)]
pub struct NatsEventBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
    metrics: Arc<BusMetrics>,
    shutdown: Arc<AtomicBool>,
}

impl NatsEventBus {
    /// Connect to a NATS server with default settings.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(NatsConfig::new(url)).await
    }

    /// Connect with custom configuration and ensure the event stream exists.
    pub async fn connect_with_config(config: NatsConfig) -> Result<Self> {
        let urls = config.urls.join(",");
        info!(urls = %urls, "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(config.connection_timeout)
            .request_timeout(Some(config.request_timeout))
            .retry_on_initial_connect()
            .connect(&urls)
            .await
            .map_err(|e| Error::EventBus(format!("Failed to connect to NATS: {}", e)))?;

        let jetstream = jetstream::new(client.clone());

        let stream_config = StreamConfig {
            name: config.stream_name.clone(),
            subjects: STREAM_SUBJECTS.iter().map(|s| s.to_string()).collect(),
            retention: jetstream::stream::RetentionPolicy::Limits,
            max_age: config.max_age,
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| Error::EventBus(format!("Failed to create stream: {}", e)))?;

        let metrics = BusMetrics::new();
        metrics.set_connected(true);
        info!(stream = %config.stream_name, "Connected to NATS and initialized JetStream");

        Ok(Self {
            client,
            jetstream,
            config,
            metrics,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get metrics.
    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    /// Check if shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Graceful shutdown - drain all connections.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown");
        self.shutdown.store(true, Ordering::SeqCst);

        if let Err(e) = self.client.drain().await {
            error!(error = %e, "Error draining NATS connection");
        }

        self.metrics.set_connected(false);
        info!("NATS connection drained");

        Ok(())
    }

    /// Get stream info.
    pub async fn stream_info(&self) -> Result<StreamInfo> {
        let mut stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| Error::EventBus(format!("Failed to get stream: {}", e)))?;

        let info = stream
            .info()
            .await
            .map_err(|e| Error::EventBus(format!("Failed to get stream info: {}", e)))?;

        Ok(StreamInfo {
            name: info.config.name.clone(),
            messages: info.state.messages,
            bytes: info.state.bytes,
            consumer_count: info.state.consumer_count,
        })
    }

    async fn create_event_stream(
        &self,
        consumer: jetstream::consumer::Consumer<jetstream::consumer::pull::Config>,
    ) -> Result<EventStream> {
        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::EventBus(format!("Failed to get messages: {}", e)))?;

        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();

        let stream = messages.then(move |msg_result| {
            let metrics = metrics.clone();
            let shutdown = shutdown.clone();
            async move {
                if shutdown.load(Ordering::SeqCst) {
                    return Err(Error::EventBus("Shutdown in progress".to_string()));
                }

                let msg = msg_result.map_err(|e| Error::EventBus(format!("Message error: {}", e)))?;
                let event = serde_json::from_slice::<Event>(&msg.payload)
                    .map_err(|e| Error::Serialization(e.to_string()));

                // Ack after decoding so a crash before this point redelivers.
                if let Err(e) = msg.ack().await {
                    warn!(error = %e, "Failed to ack message");
                }
                metrics.record_receive();
                event
            }
        });

        Ok(Box::pin(stream))
    }
}

/// Information about a JetStream stream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub name: String,
    pub messages: u64,
    pub bytes: u64,
    pub consumer_count: usize,
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::EventBus(
                "Cannot publish: shutdown in progress".to_string(),
            ));
        }

        let subject = event.subject();
        let payload = serde_json::to_vec(&event)?;
        let payload_len = payload.len() as u64;
        debug!(subject = %subject, "Publishing event");

        match self
            .jetstream
            .publish(subject.clone(), payload.into())
            .await
        {
            Ok(ack_future) => {
                ack_future
                    .await
                    .map_err(|e| Error::EventBus(format!("Failed to confirm publish: {}", e)))?;
                self.metrics.record_publish(payload_len);
                Ok(())
            }
            Err(e) => {
                self.metrics.record_publish_failure();
                Err(Error::EventBus(format!(
                    "Failed to publish to {}: {}",
                    subject, e
                )))
            }
        }
    }

    async fn subscribe(&self, pattern: &str) -> Result<EventStream> {
        debug!(pattern = %pattern, "Subscribing");

        let consumer = self
            .jetstream
            .create_consumer_on_stream(
                ConsumerConfig {
                    filter_subject: pattern.to_string(),
                    max_deliver: self.config.max_deliver,
                    ack_wait: self.config.ack_wait,
                    ..Default::default()
                },
                &self.config.stream_name,
            )
            .await
            .map_err(|e| Error::EventBus(format!("Failed to create consumer: {}", e)))?;

        self.create_event_stream(consumer).await
    }
}
