//! Event bus consumer with explicit acknowledgement and automatic resubscription.
//!
//! [`EventConsumer`] owns the poll-process-acknowledge loop of one consumer
//! group member:
//!
//! ```text
//! loop {
//!     subscribe(group, topics)
//!     loop {
//!         delivery = next()           (or shutdown)
//!         disposition = handler(delivery)
//!         Ack       -> delivery.ack()
//!         Redeliver -> sleep(redelivery_delay); delivery.nack()
//!     }
//!     stream ended -> sleep(retry_delay), resubscribe
//! }
//! ```
//!
//! A worker never pulls the next delivery before the current one is decided.
//! [`ConsumerPool`] runs several workers of the same group so that different
//! partitions are processed in parallel.
//!
//! # Example
//!
//! ```rust,ignore
//! let pool = EventConsumer::builder()
//!     .name("age-service")
//!     .group("age-service")
//!     .topics(vec!["person-created-topic".to_string()])
//!     .event_bus(event_bus)
//!     .handler(handler)
//!     .shutdown(shutdown_rx)
//!     .build_pool(4)?;
//!
//! let handles = pool.spawn();
//! ```

use crate::handler::{Disposition, EventHandler};
use crate::metrics::ConsumerMetrics;
use age_saga_core::event_bus::{Delivery, EventBus, EventStream};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

/// Errors raised while assembling a consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// A required builder field was not set.
    #[error("Consumer setting '{0}' is required")]
    MissingField(&'static str),
}

enum StreamEnd {
    Shutdown,
    Ended,
}

/// One member of a consumer group.
///
/// # Configuration
///
/// - `name`: consumer name used in logs and metrics
/// - `group`: consumer group joined on the bus
/// - `topics`: topics to subscribe to
/// - `event_bus`: bus to consume from
/// - `handler`: handler that processes each delivery
/// - `shutdown`: broadcast receiver for graceful shutdown
/// - `retry_delay`: wait before resubscribing after a failure (default: 5s)
/// - `redelivery_delay`: wait before rejecting a delivery (default: 500ms)
pub struct EventConsumer {
    name: String,
    group: String,
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
    redelivery_delay: Duration,
}

impl EventConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> EventConsumerBuilder {
        EventConsumerBuilder::default()
    }

    /// Consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the consumer as a background task.
    ///
    /// The task runs until a shutdown signal is received.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(consumer = %self.name, group = %self.group, "Event consumer started");

        loop {
            let subscribed = {
                let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
                tokio::select! {
                    _ = self.shutdown.recv() => None,
                    result = self.event_bus.subscribe(&self.group, &topics) => Some(result),
                }
            };

            let stopped = match subscribed {
                None => true,
                Some(Ok(mut stream)) => {
                    info!(consumer = %self.name, topics = ?self.topics, "Subscribed to event bus");
                    match self.process_stream(&mut stream).await {
                        StreamEnd::Shutdown => true,
                        StreamEnd::Ended => {
                            warn!(
                                consumer = %self.name,
                                "Event stream ended, resubscribing in {:?}",
                                self.retry_delay
                            );
                            self.pause(self.retry_delay).await
                        }
                    }
                }
                Some(Err(e)) => {
                    error!(
                        consumer = %self.name,
                        error = %e,
                        "Failed to subscribe to event bus, retrying in {:?}",
                        self.retry_delay
                    );
                    self.pause(self.retry_delay).await
                }
            };

            if stopped {
                break;
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    /// Sleep for `delay`; returns `true` if shutdown was requested meanwhile.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.recv() => true,
            () = tokio::time::sleep(delay) => false,
        }
    }

    async fn process_stream(&mut self, stream: &mut EventStream) -> StreamEnd {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    return StreamEnd::Shutdown;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let span = info_span!(
                        "delivery",
                        consumer = %self.name,
                        topic = %delivery.topic,
                        key = %delivery.key,
                        attempt = delivery.attempt,
                    );
                    self.dispatch(delivery).instrument(span).await;
                }
                Some(Err(e)) => {
                    ConsumerMetrics::record_stream_error(&self.name);
                    error!(consumer = %self.name, error = %e, "Error receiving event from stream");
                }
                None => return StreamEnd::Ended,
            }
        }
    }

    async fn dispatch(&self, delivery: Delivery) {
        let started = Instant::now();
        let disposition = self.handler.handle(&delivery).await;
        ConsumerMetrics::record_delivery(&self.name, disposition.label(), started.elapsed());

        match disposition {
            Disposition::Ack => delivery.ack(),
            Disposition::Redeliver { reason } => {
                warn!(
                    reason = %reason,
                    delay_ms = self.redelivery_delay.as_millis(),
                    "Delivery not processed, it will be redelivered"
                );
                tokio::time::sleep(self.redelivery_delay).await;
                delivery.nack();
            }
        }
    }
}

/// Several workers of the same consumer group.
pub struct ConsumerPool {
    workers: Vec<EventConsumer>,
}

impl ConsumerPool {
    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no worker.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Spawn every worker.
    #[must_use]
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        self.workers.into_iter().map(EventConsumer::spawn).collect()
    }
}

/// Builder for configuring an `EventConsumer`.
#[derive(Default)]
pub struct EventConsumerBuilder {
    name: Option<String>,
    group: Option<String>,
    topics: Option<Vec<String>>,
    event_bus: Option<Arc<dyn EventBus>>,
    handler: Option<Arc<dyn EventHandler>>,
    shutdown: Option<broadcast::Receiver<()>>,
    retry_delay: Option<Duration>,
    redelivery_delay: Option<Duration>,
}

impl EventConsumerBuilder {
    /// Set consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the consumer group.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set topics to subscribe to.
    #[must_use]
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Set event bus instance.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Set event handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set resubscription delay (default: 5 seconds).
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Set the pause before a rejected delivery is handed back (default: 500ms).
    #[must_use]
    pub const fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }

    /// Build the `EventConsumer`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::MissingField`] if name, group, topics,
    /// event bus, handler or shutdown receiver is missing.
    pub fn build(self) -> Result<EventConsumer, ConsumerError> {
        let group = self.group.ok_or(ConsumerError::MissingField("group"))?;
        Ok(EventConsumer {
            name: self.name.unwrap_or_else(|| group.clone()),
            group,
            topics: self.topics.ok_or(ConsumerError::MissingField("topics"))?,
            event_bus: self
                .event_bus
                .ok_or(ConsumerError::MissingField("event_bus"))?,
            handler: self.handler.ok_or(ConsumerError::MissingField("handler"))?,
            shutdown: self
                .shutdown
                .ok_or(ConsumerError::MissingField("shutdown"))?,
            retry_delay: self.retry_delay.unwrap_or(Duration::from_secs(5)),
            redelivery_delay: self
                .redelivery_delay
                .unwrap_or(Duration::from_millis(500)),
        })
    }

    /// Build `workers` members of the same group (at least one).
    ///
    /// Worker `i` is named `{name}-{i}`.
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub fn build_pool(self, workers: usize) -> Result<ConsumerPool, ConsumerError> {
        let template = self.build()?;
        let workers = workers.max(1);

        let mut pool = Vec::with_capacity(workers);
        for i in 1..workers {
            pool.push(EventConsumer {
                name: format!("{}-{i}", template.name),
                group: template.group.clone(),
                topics: template.topics.clone(),
                event_bus: Arc::clone(&template.event_bus),
                handler: Arc::clone(&template.handler),
                shutdown: template.shutdown.resubscribe(),
                retry_delay: template.retry_delay,
                redelivery_delay: template.redelivery_delay,
            });
        }
        let name = format!("{}-0", template.name);
        pool.insert(0, EventConsumer { name, ..template });

        Ok(ConsumerPool { workers: pool })
    }
}
