//! Event bus abstraction for service-to-service communication.
//!
//! The two saga services never call each other. Every interaction goes through
//! the [`EventBus`]: a service publishes an event to a topic under a partition
//! key, and the other service's consumer group receives it as a [`Delivery`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  PersonCreated   ┌──────────────────┐
//! │ Registry Service │ ───────────────► │   Age Service    │
//! │                  │                  │                  │
//! │                  │ ◄─────────────── │                  │
//! └──────────────────┘   AgeComputed    └──────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Ordered within partition**: events sharing a key keep their order
//! - **At-least-once delivery**: a delivery that is not acknowledged comes back
//! - **Idempotency**: subscribers must handle duplicate deliveries
//! - **No cross-topic ordering**: a reply may overtake the write that caused it
//!
//! # Acknowledgement
//!
//! Each [`Delivery`] holds the bus's acknowledgement channel. Calling
//! [`Delivery::ack`] advances the consumer group's position past the record.
//! Calling [`Delivery::nack`], or dropping the delivery without deciding,
//! leaves the position in place and the record is delivered again with a
//! higher [`Delivery::attempt`]. A subscription does not hand out the next
//! record of a partition before the current one is decided.
//!
//! # Example
//!
//! ```rust,ignore
//! use age_saga_core::event_bus::EventBus;
//! use futures::StreamExt;
//!
//! async fn example(event_bus: &dyn EventBus, event: SerializedEvent) -> Result<(), EventBusError> {
//!     event_bus.publish("person-created-topic", "3f2c...", &event).await?;
//!
//!     let mut stream = event_bus.subscribe("age-service", &["person-created-topic"]).await?;
//!     while let Some(delivery) = stream.next().await {
//!         let delivery = delivery?;
//!         println!("Received: {}", delivery.event);
//!         delivery.ack();
//!     }
//!     Ok(())
//! }
//! ```

use crate::event::SerializedEvent;
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to deserialize an envelope received from the transport
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Topic not found or invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Consumer group error (offset commit, rebalance)
    #[error("Consumer group error: {0}")]
    ConsumerGroupError(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Generic error for other failures
    #[error("Event bus error: {0}")]
    Other(String),
}

impl EventBusError {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Broker and network failures are retryable. A bad topic name or an
    /// envelope that cannot be decoded fails the same way every time.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::PublishFailed { .. }
                | Self::TransportError(_)
                | Self::ConsumerGroupError(_)
        )
    }
}

/// Outcome a consumer reports for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Processed; advance past the record.
    Ack,
    /// Not processed; deliver the record again.
    Nack,
}

/// One record handed to a consumer group member.
///
/// The acknowledgement handle is consumed by [`Delivery::ack`] or
/// [`Delivery::nack`]. Dropping an undecided delivery counts as a nack.
pub struct Delivery {
    /// Topic the record was read from.
    pub topic: String,
    /// Partition key the record was published with.
    pub key: String,
    /// The envelope.
    pub event: SerializedEvent,
    /// 1 on first delivery, incremented on every redelivery of the same record.
    pub attempt: u32,
    acknowledger: Option<oneshot::Sender<AckDecision>>,
}

impl Delivery {
    /// Create a delivery and the receiver on which the decision arrives.
    ///
    /// The receiver yields an error when the delivery is dropped undecided;
    /// bus implementations treat that as [`AckDecision::Nack`].
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        key: impl Into<String>,
        event: SerializedEvent,
        attempt: u32,
    ) -> (Self, oneshot::Receiver<AckDecision>) {
        let (tx, rx) = oneshot::channel();
        let delivery = Self {
            topic: topic.into(),
            key: key.into(),
            event,
            attempt,
            acknowledger: Some(tx),
        };
        (delivery, rx)
    }

    /// Acknowledge the record.
    pub fn ack(self) {
        self.decide(AckDecision::Ack);
    }

    /// Reject the record so that it is delivered again.
    pub fn nack(self) {
        self.decide(AckDecision::Nack);
    }

    /// Report `decision` to the bus.
    pub fn decide(mut self, decision: AckDecision) {
        if let Some(tx) = self.acknowledger.take() {
            // The subscription may already be gone; the record is then redelivered anyway.
            let _ = tx.send(decision);
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .field("event", &self.event.event_type)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one bus instance is shared by the
/// HTTP handlers, the publishers and every consumer worker of a service.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be used as `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic under a partition key.
    ///
    /// All events sharing `key` land on the same partition and are delivered
    /// in publish order.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] (or a transport error) if the
    /// broker did not accept the event.
    fn publish(
        &self,
        topic: &str,
        key: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Join consumer group `group` on `topics`.
    ///
    /// Every group receives its own copy of each record; members of the same
    /// group share the partitions between them.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription fails.
    fn subscribe(
        &self,
        group: &str,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
