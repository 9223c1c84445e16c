//! Both services wired on one in-memory bus.
//!
//! The registry creates persons, the age service consumes `PersonCreated`
//! and replies, the registry reconciles. Both clocks stand at
//! 2026-02-16T10:00Z.

#![allow(clippy::expect_used, clippy::panic)]

use age_saga_contracts::{AgeComputed, PersonCreated, PersonId, topics};
use age_saga_core::event::{EventMetadata, SerializedEvent};
use age_saga_core::event_bus::EventBus;
use age_saga_runtime::{EventConsumer, EventPublisher, RetryPolicy};
use age_saga_testing::{InMemoryEventBus, test_clock};
use age_service::PersonCreatedHandler;
use age_service::store::{DerivedAgeStore, InMemoryDerivedAgeStore};
use chrono::NaiveDate;
use registry_service::domain::{NewPerson, Person, ProcessingStatus};
use registry_service::store::{InMemoryPersonStore, PersonStore};
use registry_service::{AgeComputedHandler, RegistryService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

struct Saga {
    bus: Arc<InMemoryEventBus>,
    persons: Arc<InMemoryPersonStore>,
    ages: Arc<InMemoryDerivedAgeStore>,
    registry: RegistryService,
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Saga {
    fn start() -> Self {
        let bus = Arc::new(InMemoryEventBus::new());
        let persons = Arc::new(InMemoryPersonStore::new());
        let ages = Arc::new(InMemoryDerivedAgeStore::new());
        let clock = Arc::new(test_clock());
        let (shutdown, _) = broadcast::channel(1);
        let publisher = EventPublisher::new(bus.clone(), RetryPolicy::no_retry());

        let registry = RegistryService::new(
            persons.clone(),
            publisher.clone(),
            clock.clone(),
            topics::PERSON_CREATED,
        );

        let mut handles = EventConsumer::builder()
            .name("age")
            .group(topics::AGE_SERVICE_GROUP)
            .topics(vec![topics::PERSON_CREATED.to_string()])
            .event_bus(bus.clone())
            .handler(Arc::new(PersonCreatedHandler::new(
                ages.clone(),
                publisher,
                clock.clone(),
                topics::AGE_COMPUTED,
                5,
            )))
            .shutdown(shutdown.subscribe())
            .redelivery_delay(Duration::from_millis(5))
            .build_pool(2)
            .expect("age consumers")
            .spawn();

        handles.extend(
            EventConsumer::builder()
                .name("registry")
                .group(topics::REGISTRY_SERVICE_GROUP)
                .topics(vec![topics::AGE_COMPUTED.to_string()])
                .event_bus(bus.clone())
                .handler(Arc::new(AgeComputedHandler::new(persons.clone(), clock)))
                .shutdown(shutdown.subscribe())
                .redelivery_delay(Duration::from_millis(5))
                .build_pool(2)
                .expect("registry consumers")
                .spawn(),
        );

        Self {
            bus,
            persons,
            ages,
            registry,
            shutdown,
            handles,
        }
    }

    async fn create(&self, birth_date: NaiveDate) -> Person {
        self.registry
            .create(
                NewPerson {
                    last_name: "Durand".to_string(),
                    first_name: "Marie".to_string(),
                    birth_date: Some(birth_date),
                    ..NewPerson::default()
                },
                Some("saga-test".to_string()),
            )
            .await
            .expect("create")
    }

    async fn publish<E>(&self, topic: &str, person_id: PersonId, event: &E)
    where
        E: age_saga_core::event::Event + serde::Serialize,
    {
        let envelope =
            SerializedEvent::from_event(event, EventMetadata::default()).expect("encode");
        self.bus
            .publish(topic, &person_id.partition_key(), &envelope)
            .await
            .expect("publish");
    }

    /// Wait until both groups have acknowledged everything published so far.
    async fn settled(&self) {
        for _ in 0..1000 {
            let age_pending = self
                .bus
                .pending(topics::AGE_SERVICE_GROUP, topics::PERSON_CREATED);
            let registry_pending = self
                .bus
                .pending(topics::REGISTRY_SERVICE_GROUP, topics::AGE_COMPUTED);
            if age_pending == 0 && registry_pending == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("saga did not settle");
    }

    async fn person(&self, id: PersonId) -> Person {
        self.persons
            .find(id)
            .await
            .expect("find")
            .expect("person exists")
    }

    fn age_outcomes(&self) -> Vec<(AgeComputed, EventMetadata)> {
        self.bus
            .published(topics::AGE_COMPUTED)
            .into_iter()
            .map(|(_, envelope)| {
                let event = envelope.decode(AgeComputed::EVENT_TYPE).expect("decode");
                (event, envelope.metadata)
            })
            .collect()
    }

    async fn stop(self) {
        self.shutdown.send(()).expect("consumers running");
        for handle in self.handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("consumer stops")
                .expect("consumer task");
        }
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("date")
}

#[tokio::test]
async fn person_born_in_2000_ends_done_at_26() {
    let saga = Saga::start();

    let created = saga.create(date(2000, 1, 1)).await;
    assert_eq!(created.status, ProcessingStatus::Pending);
    saga.settled().await;

    let person = saga.person(created.id).await;
    assert_eq!(person.status, ProcessingStatus::Done);
    assert_eq!(person.age, Some(26));

    let outcomes = saga.age_outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].1.correlation_id.as_deref(), Some("saga-test"));
    saga.stop().await;
}

#[tokio::test]
async fn future_birth_date_ends_failed_without_age() {
    let saga = Saga::start();

    let created = saga.create(date(2026, 3, 1)).await;
    saga.settled().await;

    let person = saga.person(created.id).await;
    assert_eq!(person.status, ProcessingStatus::Failed);
    assert_eq!(person.age, None);
    assert!(saga.ages.is_empty().await);
    saga.stop().await;
}

#[tokio::test]
async fn duplicate_person_created_yields_one_derived_age() {
    let saga = Saga::start();

    let created = saga.create(date(1990, 5, 15)).await;
    saga.publish(
        topics::PERSON_CREATED,
        created.id,
        &PersonCreated::new(created.id, created.birth_date),
    )
    .await;
    saga.settled().await;

    assert_eq!(saga.ages.len().await, 1);
    let derived = saga.ages.find(created.id).await.expect("find").expect("row");
    assert_eq!(derived.age, 35);

    let person = saga.person(created.id).await;
    assert_eq!(person.status, ProcessingStatus::Done);
    assert_eq!(person.age, Some(35));

    let outcomes = saga.age_outcomes();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].0, outcomes[1].0);
    saga.stop().await;
}

#[tokio::test]
async fn duplicate_age_computed_leaves_person_unchanged() {
    let saga = Saga::start();

    let created = saga.create(date(1990, 5, 15)).await;
    saga.settled().await;
    let first = saga.person(created.id).await;

    saga.publish(
        topics::AGE_COMPUTED,
        created.id,
        &AgeComputed::done(created.id, 35),
    )
    .await;
    saga.settled().await;

    assert_eq!(saga.person(created.id).await, first);
    saga.stop().await;
}

#[tokio::test]
async fn transient_age_storage_failure_converges_like_a_single_delivery() {
    let saga = Saga::start();
    saga.ages.fail_next_writes(1);

    let created = saga.create(date(1990, 5, 15)).await;
    saga.settled().await;

    assert_eq!(saga.ages.len().await, 1);
    let person = saga.person(created.id).await;
    assert_eq!(person.status, ProcessingStatus::Done);
    assert_eq!(person.age, Some(35));
    assert_eq!(saga.age_outcomes().len(), 1);
    saga.stop().await;
}

#[tokio::test]
async fn outcome_for_unknown_person_is_discarded() {
    let saga = Saga::start();
    let stranger = PersonId::new();

    saga.publish(topics::AGE_COMPUTED, stranger, &AgeComputed::done(stranger, 40))
        .await;
    saga.settled().await;

    assert!(saga.persons.is_empty().await);
    saga.stop().await;
}

#[tokio::test]
async fn many_persons_progress_in_parallel() {
    let saga = Saga::start();

    let mut ids = Vec::new();
    for year in 1950..1970 {
        ids.push(saga.create(date(year, 1, 1)).await.id);
    }
    saga.settled().await;

    for (offset, id) in (0u32..).zip(ids) {
        let person = saga.person(id).await;
        assert_eq!(person.status, ProcessingStatus::Done);
        assert_eq!(person.age, Some(76 - offset));
    }
    saga.stop().await;
}
