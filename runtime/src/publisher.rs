//! Typed, retried publishing of saga events.
//!
//! [`EventPublisher`] encodes an [`Event`] into a [`SerializedEvent`], publishes
//! it under the given partition key and retries retryable bus failures with
//! the configured [`RetryPolicy`]. A failure that survives the retries is
//! returned to the caller; nothing is dropped silently.

use crate::metrics::PublisherMetrics;
use crate::retry::RetryPolicy;
use age_saga_core::event::{Event, EventError, EventMetadata, SerializedEvent};
use age_saga_core::event_bus::{EventBus, EventBusError};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error};

/// Errors surfaced by [`EventPublisher::publish`].
#[derive(Error, Debug)]
pub enum PublishError {
    /// The event could not be encoded.
    #[error("Failed to encode {event_type}: {source}")]
    Encode {
        /// Event type being published
        event_type: &'static str,
        /// Underlying encoding error
        #[source]
        source: EventError,
    },

    /// The bus rejected the event and retrying did not help.
    #[error("Publishing {event_type} to '{topic}' failed after {attempts} attempt(s): {source}")]
    Bus {
        /// Destination topic
        topic: String,
        /// Event type being published
        event_type: &'static str,
        /// Number of publish attempts made
        attempts: u32,
        /// Last bus error
        #[source]
        source: EventBusError,
    },
}

/// Publishes events on an [`EventBus`] with retries.
#[derive(Clone)]
pub struct EventPublisher {
    event_bus: Arc<dyn EventBus>,
    policy: RetryPolicy,
}

impl EventPublisher {
    /// Create a publisher over `event_bus` retrying with `policy`.
    #[must_use]
    pub fn new(event_bus: Arc<dyn EventBus>, policy: RetryPolicy) -> Self {
        Self { event_bus, policy }
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Publish `event` to `topic` under partition key `key`.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Encode`] if the event cannot be serialized and
    /// [`PublishError::Bus`] once the bus failure is not retryable or the
    /// retries are exhausted.
    pub async fn publish<E>(
        &self,
        topic: &str,
        key: &str,
        event: &E,
        metadata: EventMetadata,
    ) -> Result<(), PublishError>
    where
        E: Event + Serialize,
    {
        let event_type = event.event_type();
        let envelope = SerializedEvent::from_event(event, metadata)
            .map_err(|source| PublishError::Encode { event_type, source })?;

        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let (bus, envelope, counter) = (&self.event_bus, &envelope, &attempts);
        let result = self
            .policy
            .retry(
                move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                    bus.publish(topic, key, envelope)
                },
                EventBusError::is_retryable,
            )
            .await;
        let attempts = attempts.load(Ordering::Relaxed);

        match result {
            Ok(()) => {
                PublisherMetrics::record_publish(topic, started.elapsed());
                debug!(topic, key, event_type, attempts, "Event published");
                Ok(())
            }
            Err(source) => {
                PublisherMetrics::record_failure(topic);
                error!(topic, key, event_type, attempts, error = %source, "Event publish failed");
                Err(PublishError::Bus {
                    topic: topic.to_string(),
                    event_type,
                    attempts,
                    source,
                })
            }
        }
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use age_saga_testing::{FlakyEventBus, InMemoryEventBus};
    use futures::StreamExt;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pinged {
        n: u32,
    }

    impl Event for Pinged {
        fn event_type(&self) -> &'static str {
            "Pinged.v1"
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .jitter(0.0)
            .build()
    }

    #[tokio::test]
    #[allow(clippy::expect_used)]
    async fn publishes_keyed_envelope() {
        let bus = Arc::new(InMemoryEventBus::new());
        let publisher = EventPublisher::new(bus.clone(), fast_policy(0));

        let mut stream = bus.subscribe("test-group", &["pings"]).await.expect("subscribe");
        publisher
            .publish("pings", "key-1", &Pinged { n: 7 }, EventMetadata::default())
            .await
            .expect("publish");

        let delivery = stream.next().await.expect("item").expect("delivery");
        assert_eq!(delivery.key, "key-1");
        assert_eq!(delivery.event.event_type, "Pinged.v1");
        let decoded: Pinged = delivery.event.decode("Pinged.v1").expect("decode");
        assert_eq!(decoded, Pinged { n: 7 });
        delivery.ack();
    }

    #[tokio::test]
    async fn retries_transient_bus_failures() {
        let inner = Arc::new(InMemoryEventBus::new());
        let bus = Arc::new(FlakyEventBus::new(inner.clone()));
        bus.fail_next_publishes(2);

        let publisher = EventPublisher::new(bus.clone(), fast_policy(3));
        let result = publisher
            .publish("pings", "key-1", &Pinged { n: 1 }, EventMetadata::default())
            .await;

        assert!(result.is_ok());
        assert_eq!(inner.published("pings").len(), 1);
    }

    #[tokio::test]
    async fn surfaces_exhausted_retries() {
        let bus = Arc::new(FlakyEventBus::new(Arc::new(InMemoryEventBus::new())));
        bus.fail_next_publishes(10);

        let publisher = EventPublisher::new(bus, fast_policy(2));
        let result = publisher
            .publish("pings", "key-1", &Pinged { n: 1 }, EventMetadata::default())
            .await;

        match result {
            Err(PublishError::Bus {
                topic, attempts, ..
            }) => {
                assert_eq!(topic, "pings");
                assert_eq!(attempts, 3);
            }
            other => unreachable!("expected bus error, got {other:?}"),
        }
    }
}
