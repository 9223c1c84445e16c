//! Integration tests for [`RedpandaEventBus`] against a real Kafka broker.
//!
//! These tests use testcontainers to start Kafka and check:
//! - Keyed publish/subscribe round-trip
//! - Ordering of records sharing a key
//! - Redelivery after a nack and after a dropped delivery
//! - Committed offsets surviving a new subscription
//! - Independent consumer groups
//!
//! # Running These Tests
//!
//! They are `#[ignore]`d by default because they need Docker and take a while
//! to start Kafka:
//! ```bash
//! cargo test -p age-saga-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use age_saga_core::event::{EventMetadata, SerializedEvent};
use age_saga_core::event_bus::{Delivery, EventBus, EventStream};
use age_saga_redpanda::RedpandaEventBus;
use futures::StreamExt;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

fn test_event(event_type: &str, data: Vec<u8>) -> SerializedEvent {
    SerializedEvent::new(event_type.to_string(), data, EventMetadata::default())
}

/// Start Kafka and return the container with a ready event bus.
async fn start_kafka() -> (ContainerAsync<Kafka>, RedpandaEventBus) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    let event_bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create event bus");

    (kafka, event_bus)
}

/// Publish a warmup record until the broker accepts it, creating the topic.
async fn ensure_topic_exists(event_bus: &RedpandaEventBus, topic: &str) {
    let warmup = test_event("warmup", vec![255]);
    for attempt in 1..=60 {
        if event_bus.publish(topic, "warmup", &warmup).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(attempt != 60, "Failed to create topic {topic}");
    }
}

/// Next non-warmup delivery; warmups are acknowledged and skipped.
async fn next_delivery(stream: &mut EventStream) -> Delivery {
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let delivery = stream
                .next()
                .await
                .expect("stream ended")
                .expect("delivery");
            if delivery.event.event_type == "warmup" {
                delivery.ack();
                continue;
            }
            return delivery;
        }
    })
    .await
    .expect("Timeout waiting for a delivery")
}

#[tokio::test]
#[ignore]
async fn keyed_round_trip_keeps_order_within_key() {
    let (_kafka, event_bus) = start_kafka().await;
    ensure_topic_exists(&event_bus, "round-trip").await;

    for i in 0..5u8 {
        event_bus
            .publish("round-trip", "person-1", &test_event(&format!("Event{i}"), vec![i]))
            .await
            .expect("Failed to publish");
    }

    let mut stream = event_bus
        .subscribe("round-trip-group", &["round-trip"])
        .await
        .expect("Failed to subscribe");

    for i in 0..5u8 {
        let delivery = next_delivery(&mut stream).await;
        assert_eq!(delivery.key, "person-1");
        assert_eq!(delivery.event.event_type, format!("Event{i}"));
        assert_eq!(delivery.event.data, vec![i]);
        assert_eq!(delivery.attempt, 1);
        delivery.ack();
    }
}

#[tokio::test]
#[ignore]
async fn nacked_record_is_redelivered_with_next_attempt() {
    let (_kafka, event_bus) = start_kafka().await;
    ensure_topic_exists(&event_bus, "redelivery").await;

    event_bus
        .publish("redelivery", "person-1", &test_event("First", vec![1]))
        .await
        .expect("Failed to publish");
    event_bus
        .publish("redelivery", "person-1", &test_event("Second", vec![2]))
        .await
        .expect("Failed to publish");

    let mut stream = event_bus
        .subscribe("redelivery-group", &["redelivery"])
        .await
        .expect("Failed to subscribe");

    let first = next_delivery(&mut stream).await;
    assert_eq!(first.event.event_type, "First");
    first.nack();

    let again = next_delivery(&mut stream).await;
    assert_eq!(again.event.event_type, "First");
    assert_eq!(again.attempt, 2);
    drop(again);

    let third = next_delivery(&mut stream).await;
    assert_eq!(third.event.event_type, "First");
    assert_eq!(third.attempt, 3);
    third.ack();

    let second = next_delivery(&mut stream).await;
    assert_eq!(second.event.event_type, "Second");
    second.ack();
}

#[tokio::test]
#[ignore]
async fn committed_offsets_survive_resubscription() {
    let (_kafka, event_bus) = start_kafka().await;
    ensure_topic_exists(&event_bus, "commits").await;

    for name in ["One", "Two"] {
        event_bus
            .publish("commits", "person-1", &test_event(name, vec![]))
            .await
            .expect("Failed to publish");
    }

    {
        let mut stream = event_bus
            .subscribe("commit-group", &["commits"])
            .await
            .expect("Failed to subscribe");
        let one = next_delivery(&mut stream).await;
        assert_eq!(one.event.event_type, "One");
        one.ack();

        // Leave "Two" undecided and drop the subscription.
        let two = next_delivery(&mut stream).await;
        assert_eq!(two.event.event_type, "Two");
    }

    // Give the group time to release the partition.
    tokio::time::sleep(Duration::from_secs(8)).await;

    let mut stream = event_bus
        .subscribe("commit-group", &["commits"])
        .await
        .expect("Failed to resubscribe");
    let resumed = next_delivery(&mut stream).await;
    assert_eq!(resumed.event.event_type, "Two");
    resumed.ack();
}

#[tokio::test]
#[ignore]
async fn every_group_receives_every_record() {
    let (_kafka, event_bus) = start_kafka().await;
    ensure_topic_exists(&event_bus, "fan-out").await;

    event_bus
        .publish("fan-out", "person-1", &test_event("Shared", vec![7]))
        .await
        .expect("Failed to publish");

    let mut audit = event_bus
        .subscribe("audit-group", &["fan-out"])
        .await
        .expect("Failed to subscribe");
    let mut billing = event_bus
        .subscribe("billing-group", &["fan-out"])
        .await
        .expect("Failed to subscribe");

    let a = next_delivery(&mut audit).await;
    let b = next_delivery(&mut billing).await;
    assert_eq!(a.event.event_type, "Shared");
    assert_eq!(b.event.event_type, "Shared");
    a.ack();
    b.ack();
}

#[tokio::test]
#[ignore]
async fn empty_topic_name_is_rejected() {
    let (_kafka, event_bus) = start_kafka().await;
    let result = event_bus.publish("", "k", &test_event("X", vec![])).await;
    assert!(result.is_err());
}
