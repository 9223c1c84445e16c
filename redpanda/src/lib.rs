//! Redpanda event bus for the age saga services.
//!
//! This crate provides a Kafka-compatible [`EventBus`] built on rdkafka. It
//! works with Redpanda, Apache Kafka or any broker speaking the Kafka protocol.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Records are published with the caller's partition key, so every event of
//!   one person lands on the same partition and keeps its order
//! - A subscription hands out one record at a time and waits for its
//!   [`Delivery`] to be decided
//! - An ack commits the offset past the record
//! - A nack (or a dropped delivery) seeks the partition back to the record,
//!   which is then delivered again with a higher attempt number
//! - If the process crashes before the commit, the record is redelivered
//!
//! Envelopes travel as [`SerializedEvent::to_bytes`]. A record that cannot be
//! decoded is surfaced once as [`EventBusError::DeserializationFailed`] and
//! committed past.
//!
//! # Example
//!
//! ```no_run
//! use age_saga_redpanda::RedpandaEventBus;
//! use age_saga_core::event_bus::EventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::new("localhost:9092")?;
//!
//! let mut stream = event_bus
//!     .subscribe("age-service", &["person-created-topic"])
//!     .await?;
//! while let Some(result) = stream.next().await {
//!     let delivery = result?;
//!     println!("Received: {}", delivery.event);
//!     delivery.ack();
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use age_saga_core::event::SerializedEvent;
use age_saga_core::event_bus::{AckDecision, Delivery, EventBus, EventBusError, EventStream};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

/// Kafka-protocol [`EventBus`].
///
/// Publishes share one producer. Every [`EventBus::subscribe`] call opens its
/// own consumer in the requested group, so a pool of subscriptions in one
/// group splits the partitions between its members.
///
/// ```no_run
/// use age_saga_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("redpanda-0:9092,redpanda-1:9092")
///     .client_id("registry-service")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    producer: FutureProducer,
    settings: BusSettings,
}

/// Connection settings shared by the producer and the consumers.
#[derive(Debug, Clone)]
struct BusSettings {
    brokers: String,
    client_id: String,
    producer_acks: String,
    send_timeout: Duration,
    seek_timeout: Duration,
    auto_offset_reset: String,
    session_timeout: Duration,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            brokers: String::new(),
            client_id: "age-saga".to_string(),
            producer_acks: "all".to_string(),
            send_timeout: Duration::from_secs(5),
            seek_timeout: Duration::from_secs(5),
            // A service started after the first events were published still sees them.
            auto_offset_reset: "earliest".to_string(),
            session_timeout: Duration::from_secs(6),
        }
    }
}

impl RedpandaEventBus {
    /// Connect to `brokers` (comma separated) with the default settings.
    ///
    /// # Errors
    ///
    /// [`EventBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start configuring a bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Bootstrap servers in use.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.settings.brokers
    }

    fn consumer_for(&self, group: &str) -> Result<StreamConsumer, rdkafka::error::KafkaError> {
        let settings = &self.settings;
        ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("client.id", &settings.client_id)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", &settings.auto_offset_reset)
            .set(
                "session.timeout.ms",
                settings.session_timeout.as_millis().to_string(),
            )
            .create()
    }
}

/// Builder for [`RedpandaEventBus`]; only the brokers are required.
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    settings: BusSettings,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated bootstrap servers.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.settings.brokers = brokers.into();
        self
    }

    /// Client id reported to the brokers, `age-saga` by default.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.settings.client_id = client_id.into();
        self
    }

    /// Producer `acks`, `all` by default.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.settings.producer_acks = acks.into();
        self
    }

    /// How long a publish may wait for the broker (5 s).
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Duration) -> Self {
        self.settings.send_timeout = timeout;
        self
    }

    /// How long a redelivery seek may take (5 s).
    #[must_use]
    pub const fn seek_timeout(mut self, timeout: Duration) -> Self {
        self.settings.seek_timeout = timeout;
        self
    }

    /// Where a new consumer group starts: `earliest` (default) or `latest`.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.settings.auto_offset_reset = policy.into();
        self
    }

    /// Consumer group session timeout (6 s).
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.settings.session_timeout = timeout;
        self
    }

    /// Create the producer.
    ///
    /// # Errors
    ///
    /// [`EventBusError::ConnectionFailed`] when no brokers were given or the
    /// producer configuration is rejected.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let settings = self.settings;
        if settings.brokers.trim().is_empty() {
            return Err(EventBusError::ConnectionFailed(
                "no brokers configured".to_string(),
            ));
        }

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("client.id", &settings.client_id)
            .set("acks", &settings.producer_acks)
            .set(
                "message.timeout.ms",
                settings.send_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| EventBusError::ConnectionFailed(format!("producer: {e}")))?;

        tracing::info!(
            brokers = %settings.brokers,
            client_id = %settings.client_id,
            acks = %settings.producer_acks,
            auto_offset_reset = %settings.auto_offset_reset,
            "Kafka event bus ready"
        );
        Ok(RedpandaEventBus { producer, settings })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = key.to_string();
        let event_type = event.event_type.clone();
        let payload = event.to_bytes();
        let timeout = self.settings.send_timeout;

        Box::pin(async move {
            if topic.is_empty() {
                return Err(EventBusError::InvalidTopic(
                    "topic name must not be empty".to_string(),
                ));
            }

            let payload = payload.map_err(|e| EventBusError::PublishFailed {
                topic: topic.clone(),
                reason: format!("Failed to serialize event: {e}"),
            })?;

            let record = FutureRecord::to(&topic).key(&key).payload(&payload);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = %key,
                        partition,
                        offset,
                        event_type = %event_type,
                        "Event published successfully"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        key = %key,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        group: &str,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let group = group.to_string();
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            if topics.is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "no topics given".to_string(),
                });
            }

            let consumer = self.consumer_for(&group).map_err(|e| {
                EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                }
            })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer.subscribe(&topic_refs).map_err(|e| {
                EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                }
            })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %group,
                manual_commit = true,
                "Subscribed to topics"
            );

            // Capacity 1: the task never reads ahead of the record in flight.
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(forward_records(consumer, tx, self.settings.seek_timeout));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

/// Position of one record, used to count its deliveries.
type RecordPosition = (String, i32, i64);

/// Count one more delivery of `position` and return its attempt number.
///
/// A partition is read in offset order, so entries for earlier offsets of the
/// same partition belong to records that were committed or handed to another
/// member; they are dropped. The map holds at most one entry per partition.
fn next_attempt(attempts: &mut HashMap<RecordPosition, u32>, position: &RecordPosition) -> u32 {
    let (topic, partition, offset) = position;
    attempts.retain(|(t, p, o), _| !(t == topic && p == partition && o < offset));
    let count = attempts.entry(position.clone()).or_insert(0);
    *count += 1;
    *count
}

/// Owns the consumer and feeds decided-one-at-a-time deliveries into `tx`.
///
/// Exits when the subscriber drops its stream or a seek fails. In both cases
/// uncommitted records stay in the group and are delivered again.
///
/// Attempt numbers live in this task only. A record that is redelivered
/// after a rebalance or a resubscription starts again at attempt 1, so a
/// handler's attempt limit bounds redeliveries per subscription, not in total.
async fn forward_records(
    consumer: StreamConsumer,
    tx: mpsc::Sender<Result<Delivery, EventBusError>>,
    seek_timeout: Duration,
) {
    let mut attempts: HashMap<RecordPosition, u32> = HashMap::new();

    loop {
        let received = tokio::select! {
            () = tx.closed() => break,
            received = consumer.recv() => received,
        };

        let message = match received {
            Ok(message) => message,
            Err(e) => {
                let err = EventBusError::TransportError(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let position: RecordPosition = (
            message.topic().to_string(),
            message.partition(),
            message.offset(),
        );
        let key = message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default();
        let decoded = match message.payload() {
            Some(payload) => SerializedEvent::from_bytes(payload).map_err(|e| {
                EventBusError::DeserializationFailed(format!("Failed to deserialize event: {e}"))
            }),
            None => Err(EventBusError::DeserializationFailed(
                "Message has no payload".to_string(),
            )),
        };
        drop(message);

        let event = match decoded {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(
                    topic = %position.0,
                    partition = position.1,
                    offset = position.2,
                    error = %err,
                    "Skipping undecodable record"
                );
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                commit(&consumer, &position);
                continue;
            }
        };

        let attempt = next_attempt(&mut attempts, &position);
        tracing::trace!(
            topic = %position.0,
            partition = position.1,
            offset = position.2,
            attempt,
            event_type = %event.event_type,
            "Received event"
        );

        let (delivery, decision) = Delivery::new(position.0.clone(), key, event, attempt);
        if tx.send(Ok(delivery)).await.is_err() {
            tracing::debug!("Subscriber dropped, exiting consumer task");
            break;
        }

        match decision.await.unwrap_or(AckDecision::Nack) {
            AckDecision::Ack => {
                attempts.remove(&position);
                commit(&consumer, &position);
            }
            AckDecision::Nack => {
                let (topic, partition, offset) = &position;
                let rewound =
                    consumer.seek(topic, *partition, Offset::Offset(*offset), seek_timeout);
                if let Err(e) = rewound {
                    tracing::error!(
                        topic = %topic,
                        partition,
                        offset,
                        error = %e,
                        "Failed to seek back for redelivery"
                    );
                    let err = EventBusError::ConsumerGroupError(format!("seek failed: {e}"));
                    let _ = tx.send(Err(err)).await;
                    break;
                }
                tracing::debug!(
                    topic = %topic,
                    partition,
                    offset,
                    attempt,
                    "Record will be redelivered"
                );
            }
        }
    }

    tracing::debug!("Consumer task exiting");
}

/// Commit the group's position past `position`.
fn commit(consumer: &StreamConsumer, (topic, partition, offset): &RecordPosition) {
    let mut list = TopicPartitionList::new();
    let result = list
        .add_partition_offset(topic, *partition, Offset::Offset(offset + 1))
        .and_then(|()| consumer.commit(&list, CommitMode::Async));
    if let Err(e) = result {
        // Not fatal: the record is delivered again after a restart.
        tracing::warn!(
            topic = %topic,
            partition,
            offset,
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}
