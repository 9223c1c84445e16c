//! In-memory event bus with consumer groups and acknowledgements.
//!
//! Behaves like a small Kafka-compatible broker:
//!
//! - every topic is split into partitions, a record's partition is chosen by
//!   hashing its key
//! - every consumer group keeps its own committed offset per partition and
//!   starts from the earliest record
//! - a partition is locked while one of its records is in flight, so records
//!   sharing a key are processed one after the other
//! - an acknowledged record advances the offset; a rejected or dropped one is
//!   delivered again with an incremented attempt number
//! - members of the same group share partitions, distinct groups each see
//!   every record

use age_saga_core::event::SerializedEvent;
use age_saga_core::event_bus::{
    AckDecision, Delivery, EventBus, EventBusError, EventStream,
};
use async_stream::stream;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, oneshot};

/// Default number of partitions per topic.
pub const DEFAULT_PARTITIONS: usize = 4;

#[derive(Clone)]
struct Record {
    key: String,
    event: SerializedEvent,
}

#[derive(Default)]
struct Cursor {
    committed: usize,
    attempts: u32,
    in_flight: bool,
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, Vec<Vec<Record>>>,
    groups: HashMap<String, HashMap<(String, usize), Cursor>>,
}

struct Shared {
    state: Mutex<BusState>,
    changed: Notify,
    partitions: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let partitions = u64::try_from(self.partitions).unwrap_or(1).max(1);
        usize::try_from(hasher.finish() % partitions).unwrap_or(0)
    }

    /// Lock the next deliverable record of `group`, scanning from `start`.
    fn claim(&self, group: &str, topics: &[String], start: usize) -> Option<Claim> {
        let mut state = self.lock();
        let BusState {
            topics: logs,
            groups,
        } = &mut *state;
        let cursors = groups.entry(group.to_string()).or_default();

        let slots: Vec<(&String, usize)> = topics
            .iter()
            .flat_map(|topic| (0..self.partitions).map(move |p| (topic, p)))
            .collect();
        if slots.is_empty() {
            return None;
        }

        for i in 0..slots.len() {
            let (topic, partition) = slots[(start + i) % slots.len()];
            let Some(log) = logs.get(topic).and_then(|parts| parts.get(partition)) else {
                continue;
            };
            let cursor = cursors.entry((topic.clone(), partition)).or_default();
            if cursor.in_flight || cursor.committed >= log.len() {
                continue;
            }

            let record = log[cursor.committed].clone();
            cursor.in_flight = true;
            cursor.attempts += 1;
            return Some(Claim {
                topic: topic.clone(),
                partition,
                offset: cursor.committed,
                attempt: cursor.attempts,
                record,
            });
        }
        None
    }

    fn settle(&self, group: &str, claim: &Claim, decision: AckDecision) {
        {
            let mut state = self.lock();
            if let Some(cursor) = state
                .groups
                .get_mut(group)
                .and_then(|cursors| cursors.get_mut(&(claim.topic.clone(), claim.partition)))
            {
                cursor.in_flight = false;
                if decision == AckDecision::Ack && cursor.committed == claim.offset {
                    cursor.committed += 1;
                    cursor.attempts = 0;
                }
            }
        }
        self.changed.notify_waiters();
    }
}

struct Claim {
    topic: String,
    partition: usize,
    offset: usize,
    attempt: u32,
    record: Record,
}

/// Releases a claimed partition as rejected unless it was settled explicitly.
struct ClaimGuard {
    shared: Arc<Shared>,
    group: String,
    claim: Option<Claim>,
}

impl ClaimGuard {
    fn settle(mut self, decision: AckDecision) {
        if let Some(claim) = self.claim.take() {
            self.shared.settle(&self.group, &claim, decision);
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if let Some(claim) = self.claim.take() {
            self.shared.settle(&self.group, &claim, AckDecision::Nack);
        }
    }
}

/// In-memory [`EventBus`] for tests and single-process deployments.
///
/// # Example
///
/// ```
/// use age_saga_core::event::{EventMetadata, SerializedEvent};
/// use age_saga_core::event_bus::EventBus;
/// use age_saga_testing::InMemoryEventBus;
/// use futures::StreamExt;
///
/// # tokio_test::block_on(async {
/// let bus = InMemoryEventBus::new();
/// let event = SerializedEvent::new("Pinged.v1".into(), vec![1], EventMetadata::default());
/// bus.publish("pings", "key-1", &event).await.unwrap();
///
/// let mut stream = bus.subscribe("group-a", &["pings"]).await.unwrap();
/// let delivery = stream.next().await.unwrap().unwrap();
/// assert_eq!(delivery.attempt, 1);
/// delivery.ack();
/// # });
/// ```
#[derive(Clone)]
pub struct InMemoryEventBus {
    shared: Arc<Shared>,
}

impl InMemoryEventBus {
    /// Create a bus with [`DEFAULT_PARTITIONS`] partitions per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Create a bus with `partitions` partitions per topic (at least one).
    #[must_use]
    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BusState::default()),
                changed: Notify::new(),
                partitions: partitions.max(1),
            }),
        }
    }

    /// Every record published to `topic` as `(key, event)`, partition by partition.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<(String, SerializedEvent)> {
        let state = self.shared.lock();
        state
            .topics
            .get(topic)
            .map(|parts| {
                parts
                    .iter()
                    .flatten()
                    .map(|record| (record.key.clone(), record.event.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Records of `topic` that `group` has not acknowledged yet.
    #[must_use]
    pub fn pending(&self, group: &str, topic: &str) -> usize {
        let state = self.shared.lock();
        let Some(parts) = state.topics.get(topic) else {
            return 0;
        };
        parts
            .iter()
            .enumerate()
            .map(|(partition, log)| {
                let committed = state
                    .groups
                    .get(group)
                    .and_then(|cursors| cursors.get(&(topic.to_string(), partition)))
                    .map_or(0, |cursor| cursor.committed);
                log.len().saturating_sub(committed)
            })
            .sum()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let record = Record {
            key: key.to_string(),
            event: event.clone(),
        };

        Box::pin(async move {
            if topic.is_empty() {
                return Err(EventBusError::InvalidTopic(topic));
            }

            let partition = self.shared.partition_for(&record.key);
            {
                let mut state = self.shared.lock();
                let parts = state
                    .topics
                    .entry(topic)
                    .or_insert_with(|| vec![Vec::new(); self.shared.partitions]);
                parts[partition].push(record);
            }
            self.shared.changed.notify_waiters();
            Ok(())
        })
    }

    fn subscribe(
        &self,
        group: &str,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let group = group.to_string();
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        let shared = Arc::clone(&self.shared);

        Box::pin(async move {
            if topics.is_empty() || topics.iter().any(String::is_empty) {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "topic names must not be empty".to_string(),
                });
            }

            let stream = stream! {
                let mut start = 0_usize;
                loop {
                    let changed = shared.changed.notified();
                    tokio::pin!(changed);
                    changed.as_mut().enable();

                    let Some(claim) = shared.claim(&group, &topics, start) else {
                        changed.await;
                        continue;
                    };
                    start = start.wrapping_add(1);

                    let (delivery, decision) = Delivery::new(
                        claim.topic.clone(),
                        claim.record.key.clone(),
                        claim.record.event.clone(),
                        claim.attempt,
                    );
                    let guard = ClaimGuard {
                        shared: Arc::clone(&shared),
                        group: group.clone(),
                        claim: Some(claim),
                    };

                    // Settle as soon as the consumer decides, even if it never polls again.
                    let (settled_tx, settled_rx) = oneshot::channel::<()>();
                    tokio::spawn(async move {
                        // A dropped delivery closes the channel and counts as a rejection.
                        let decision = decision.await.unwrap_or(AckDecision::Nack);
                        guard.settle(decision);
                        let _ = settled_tx.send(());
                    });

                    yield Ok(delivery);

                    // The settling task only disappears when the runtime shuts down.
                    if settled_rx.await.is_err() {
                        break;
                    }
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use age_saga_core::event::EventMetadata;
    use futures::StreamExt;
    use std::time::Duration;

    fn event(n: u8) -> SerializedEvent {
        SerializedEvent::new("Test.v1".to_string(), vec![n], EventMetadata::default())
    }

    async fn next(stream: &mut EventStream) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("delivery in time")
            .expect("stream open")
            .expect("delivery")
    }

    async fn wait_drained(bus: &InMemoryEventBus, group: &str, topic: &str) {
        for _ in 0..100 {
            if bus.pending(group, topic) == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(bus.pending(group, topic), 0, "group {group} did not drain {topic}");
    }

    #[tokio::test]
    async fn records_with_same_key_are_delivered_in_order() {
        let bus = InMemoryEventBus::new();
        for n in 0..5 {
            bus.publish("t", "same-key", &event(n)).await.expect("publish");
        }

        let mut stream = bus.subscribe("g", &["t"]).await.expect("subscribe");
        for n in 0..5 {
            let delivery = next(&mut stream).await;
            assert_eq!(delivery.event.data, vec![n]);
            delivery.ack();
        }
        wait_drained(&bus, "g", "t").await;
    }

    #[tokio::test]
    async fn nack_redelivers_with_next_attempt() {
        let bus = InMemoryEventBus::new();
        bus.publish("t", "k", &event(1)).await.expect("publish");
        let mut stream = bus.subscribe("g", &["t"]).await.expect("subscribe");

        let first = next(&mut stream).await;
        assert_eq!(first.attempt, 1);
        first.nack();

        let second = next(&mut stream).await;
        assert_eq!(second.attempt, 2);
        assert_eq!(second.event.data, vec![1]);
        second.ack();
        wait_drained(&bus, "g", "t").await;
    }

    #[tokio::test]
    async fn dropped_delivery_is_redelivered() {
        let bus = InMemoryEventBus::new();
        bus.publish("t", "k", &event(1)).await.expect("publish");
        let mut stream = bus.subscribe("g", &["t"]).await.expect("subscribe");

        drop(next(&mut stream).await);
        let again = next(&mut stream).await;
        assert_eq!(again.attempt, 2);
        again.ack();
    }

    #[tokio::test]
    async fn abandoned_subscription_releases_the_partition() {
        let bus = InMemoryEventBus::new();
        bus.publish("t", "k", &event(1)).await.expect("publish");

        let mut first = bus.subscribe("g", &["t"]).await.expect("subscribe");
        let undecided = next(&mut first).await;
        drop(first);
        drop(undecided);

        let mut second = bus.subscribe("g", &["t"]).await.expect("subscribe");
        let delivery = next(&mut second).await;
        assert_eq!(delivery.attempt, 2);
        delivery.ack();
    }

    #[tokio::test]
    async fn every_group_gets_its_own_copy() {
        let bus = InMemoryEventBus::new();
        bus.publish("t", "k", &event(9)).await.expect("publish");

        let mut a = bus.subscribe("a", &["t"]).await.expect("subscribe");
        let mut b = bus.subscribe("b", &["t"]).await.expect("subscribe");
        next(&mut a).await.ack();
        next(&mut b).await.ack();

        wait_drained(&bus, "a", "t").await;
        wait_drained(&bus, "b", "t").await;
    }

    #[tokio::test]
    async fn in_flight_partition_is_not_shared_within_a_group() {
        let bus = InMemoryEventBus::with_partitions(1);
        bus.publish("t", "k1", &event(1)).await.expect("publish");
        bus.publish("t", "k2", &event(2)).await.expect("publish");

        let mut a = bus.subscribe("g", &["t"]).await.expect("subscribe");
        let mut b = bus.subscribe("g", &["t"]).await.expect("subscribe");

        let held = next(&mut a).await;
        assert_eq!(held.event.data, vec![1]);
        let blocked = tokio::time::timeout(Duration::from_millis(50), b.next()).await;
        assert!(blocked.is_err(), "second member must wait for the partition");

        held.ack();
        let delivery = next(&mut b).await;
        assert_eq!(delivery.event.data, vec![2]);
        delivery.ack();
    }

    #[tokio::test]
    async fn subscriber_wakes_up_on_publish() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe("g", &["t"]).await.expect("subscribe");

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("t", "k", &event(3)).await.expect("publish");
        });

        let delivery = next(&mut stream).await;
        assert_eq!(delivery.key, "k");
        delivery.ack();
    }

    #[tokio::test]
    async fn empty_topic_is_rejected() {
        let bus = InMemoryEventBus::new();
        assert!(matches!(
            bus.publish("", "k", &event(1)).await,
            Err(EventBusError::InvalidTopic(_))
        ));
        assert!(bus.subscribe("g", &[]).await.is_err());
    }
}
