//! `PersonCreated` processing.
//!
//! Every delivery ends in exactly one of three ways:
//!
//! - an `AgeComputed` outcome is published and the delivery is acknowledged
//! - the outcome could not be published, or storage is briefly unavailable,
//!   and the delivery is handed back for redelivery
//! - the envelope is not a readable `PersonCreated` and is dropped as poison
//!
//! Validation failures and permanent storage failures are reported as
//! `FAILED` outcomes so the registry never waits forever.

use crate::domain::{DerivedAge, validate_birth_date};
use crate::store::{DerivedAgeStore, InsertOutcome};
use age_saga_contracts::{AgeComputed, PersonCreated};
use age_saga_core::environment::Clock;
use age_saga_core::event_bus::Delivery;
use age_saga_runtime::handler::{Disposition, EventHandler};
use age_saga_runtime::metrics::{ConsumerMetrics, SagaMetrics};
use age_saga_runtime::publisher::EventPublisher;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Name under which the age service signs its events.
pub const SOURCE: &str = "age-service";

/// Computes ages for `PersonCreated` deliveries and reports the outcome.
pub struct PersonCreatedHandler {
    store: Arc<dyn DerivedAgeStore>,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    outcome_topic: String,
    max_delivery_attempts: u32,
}

impl PersonCreatedHandler {
    /// Create a handler publishing outcomes to `outcome_topic`.
    ///
    /// A transient storage failure is retried by redelivery until the
    /// delivery reaches `max_delivery_attempts`, then reported as `FAILED`.
    #[must_use]
    pub fn new(
        store: Arc<dyn DerivedAgeStore>,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
        outcome_topic: impl Into<String>,
        max_delivery_attempts: u32,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            outcome_topic: outcome_topic.into(),
            max_delivery_attempts: max_delivery_attempts.max(1),
        }
    }

    /// Decide the outcome for `event`, or `Err(reason)` to ask for redelivery.
    async fn evaluate(
        &self,
        event: &PersonCreated,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<AgeComputed, String> {
        let person_id = event.person_id;

        let birth_date = match validate_birth_date(event.birth_date, now.date_naive()) {
            Ok(date) => date,
            Err(e) => {
                warn!(%person_id, error = %e, "Birth date rejected, reporting FAILED");
                return Ok(AgeComputed::failed(person_id));
            }
        };

        let record = DerivedAge::compute(person_id, birth_date, now);
        match self.store.insert_if_absent(&record).await {
            Ok(InsertOutcome::Inserted) => {
                info!(%person_id, age = record.age, "Derived age stored");
                Ok(AgeComputed::done(person_id, record.age))
            }
            Ok(InsertOutcome::AlreadyPresent(existing)) => {
                info!(
                    %person_id,
                    age = existing.age,
                    "Derived age already stored, replaying outcome"
                );
                Ok(AgeComputed::done(person_id, existing.age))
            }
            Err(e) if e.is_transient() && attempt < self.max_delivery_attempts => {
                warn!(
                    %person_id,
                    attempt,
                    max_attempts = self.max_delivery_attempts,
                    error = %e,
                    "Derived age not stored, waiting for redelivery"
                );
                Err(format!("storage unavailable: {e}"))
            }
            Err(e) => {
                error!(%person_id, attempt, error = %e, "Derived age not stored, reporting FAILED");
                Ok(AgeComputed::failed(person_id))
            }
        }
    }
}

#[async_trait]
impl EventHandler for PersonCreatedHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let event: PersonCreated = match delivery.event.decode(PersonCreated::EVENT_TYPE) {
            Ok(event) => event,
            Err(e) => {
                ConsumerMetrics::record_poison(SOURCE);
                error!(
                    key = %delivery.key,
                    event_type = %delivery.event.event_type,
                    error = %e,
                    "Dropping unreadable PersonCreated delivery"
                );
                return Disposition::Ack;
            }
        };

        let now = self.clock.now();
        let outcome = match self.evaluate(&event, delivery.attempt, now).await {
            Ok(outcome) => outcome,
            Err(reason) => return Disposition::redeliver(reason),
        };

        let person_id = event.person_id;
        let metadata = delivery.event.metadata.caused_by(
            format!("{}/{person_id}", PersonCreated::EVENT_TYPE),
            SOURCE,
            now,
        );
        if let Err(e) = self
            .publisher
            .publish(
                &self.outcome_topic,
                &person_id.partition_key(),
                &outcome,
                metadata,
            )
            .await
        {
            return Disposition::redeliver(format!("outcome not published: {e}"));
        }

        SagaMetrics::record_age_outcome(outcome.status.as_str());
        info!(%person_id, status = %outcome.status, age = ?outcome.age, "Age outcome published");
        Disposition::Ack
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryDerivedAgeStore;
    use age_saga_contracts::{AgeOutcome, PersonId};
    use age_saga_core::event::{EventMetadata, SerializedEvent};
    use age_saga_runtime::RetryPolicy;
    use age_saga_testing::{FlakyEventBus, InMemoryEventBus, test_clock};
    use chrono::NaiveDate;
    use std::time::Duration;

    const OUTCOMES: &str = "age-calculated-topic";

    struct Fixture {
        bus: Arc<InMemoryEventBus>,
        flaky: Arc<FlakyEventBus>,
        store: Arc<InMemoryDerivedAgeStore>,
        handler: PersonCreatedHandler,
    }

    fn fixture(max_attempts: u32) -> Fixture {
        let bus = Arc::new(InMemoryEventBus::new());
        let flaky = Arc::new(FlakyEventBus::new(bus.clone()));
        let store = Arc::new(InMemoryDerivedAgeStore::new());
        let policy = RetryPolicy::builder()
            .max_retries(1)
            .initial_delay(Duration::from_millis(1))
            .build();
        let handler = PersonCreatedHandler::new(
            store.clone(),
            EventPublisher::new(flaky.clone(), policy),
            Arc::new(test_clock()),
            OUTCOMES,
            max_attempts,
        );
        Fixture {
            bus,
            flaky,
            store,
            handler,
        }
    }

    fn delivery(event: &PersonCreated, attempt: u32) -> Delivery {
        let metadata = EventMetadata::default().with_correlation_id("req-1");
        let envelope = SerializedEvent::from_event(event, metadata).expect("encode");
        Delivery::new(
            "person-created-topic",
            event.person_id.partition_key(),
            envelope,
            attempt,
        )
        .0
    }

    fn born(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    fn outcomes(bus: &InMemoryEventBus) -> Vec<(String, AgeComputed, EventMetadata)> {
        bus.published(OUTCOMES)
            .into_iter()
            .map(|(key, envelope)| {
                let event: AgeComputed = envelope.decode(AgeComputed::EVENT_TYPE).expect("decode");
                (key, event, envelope.metadata)
            })
            .collect()
    }

    #[tokio::test]
    async fn valid_birth_date_is_stored_and_reported_done() {
        let f = fixture(5);
        let event = PersonCreated::new(PersonId::new(), born(2000, 1, 1));

        assert_eq!(f.handler.handle(&delivery(&event, 1)).await, Disposition::Ack);

        let stored = f.store.find(event.person_id).await.expect("find").expect("row");
        assert_eq!(stored.age, 26);
        assert_eq!(stored.birth_date, born(2000, 1, 1));

        let published = outcomes(&f.bus);
        assert_eq!(published.len(), 1);
        let (key, outcome, metadata) = &published[0];
        assert_eq!(key, &event.person_id.partition_key());
        assert_eq!(outcome.outcome(), Ok(AgeOutcome::Done { age: 26 }));
        assert_eq!(metadata.correlation_id.as_deref(), Some("req-1"));
        assert_eq!(metadata.source.as_deref(), Some(SOURCE));
        assert_eq!(
            metadata.causation_id,
            Some(format!("PersonCreated.v1/{}", event.person_id))
        );
    }

    #[tokio::test]
    async fn future_birth_date_is_reported_failed_without_a_row() {
        let f = fixture(5);
        let event = PersonCreated::new(PersonId::new(), born(2026, 3, 1));

        assert_eq!(f.handler.handle(&delivery(&event, 1)).await, Disposition::Ack);

        assert!(f.store.is_empty().await);
        let published = outcomes(&f.bus);
        assert_eq!(published[0].1, AgeComputed::failed(event.person_id));
    }

    #[tokio::test]
    async fn missing_birth_date_is_reported_failed() {
        let f = fixture(5);
        let event = PersonCreated {
            person_id: PersonId::new(),
            birth_date: None,
        };

        assert_eq!(f.handler.handle(&delivery(&event, 1)).await, Disposition::Ack);
        assert_eq!(outcomes(&f.bus)[0].1, AgeComputed::failed(event.person_id));
    }

    #[tokio::test]
    async fn replay_keeps_one_row_and_repeats_the_outcome() {
        let f = fixture(5);
        let event = PersonCreated::new(PersonId::new(), born(1990, 5, 15));

        f.handler.handle(&delivery(&event, 1)).await;
        f.handler.handle(&delivery(&event, 1)).await;

        assert_eq!(f.store.len().await, 1);
        let published = outcomes(&f.bus);
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].1, published[1].1);
        assert_eq!(published[0].1, AgeComputed::done(event.person_id, 35));
    }

    #[tokio::test]
    async fn transient_storage_failure_asks_for_redelivery() {
        let f = fixture(5);
        f.store.fail_next_writes(1);
        let event = PersonCreated::new(PersonId::new(), born(1990, 5, 15));

        let first = f.handler.handle(&delivery(&event, 1)).await;
        assert!(matches!(first, Disposition::Redeliver { .. }));
        assert!(outcomes(&f.bus).is_empty());

        assert_eq!(f.handler.handle(&delivery(&event, 2)).await, Disposition::Ack);
        assert_eq!(outcomes(&f.bus).len(), 1);
        assert_eq!(f.store.len().await, 1);
    }

    #[tokio::test]
    async fn storage_failure_on_last_attempt_is_reported_failed() {
        let f = fixture(3);
        f.store.fail_next_writes(1);
        let event = PersonCreated::new(PersonId::new(), born(1990, 5, 15));

        assert_eq!(f.handler.handle(&delivery(&event, 3)).await, Disposition::Ack);
        assert_eq!(outcomes(&f.bus)[0].1, AgeComputed::failed(event.person_id));
    }

    #[tokio::test]
    async fn exhausted_publish_retries_ask_for_redelivery() {
        let f = fixture(5);
        f.flaky.fail_next_publishes(2);
        let event = PersonCreated::new(PersonId::new(), born(2000, 1, 1));

        let first = f.handler.handle(&delivery(&event, 1)).await;
        assert!(matches!(first, Disposition::Redeliver { .. }));
        assert_eq!(f.flaky.failed_publishes(), 2);
        // The row survives; the redelivery replays it.
        assert_eq!(f.store.len().await, 1);

        assert_eq!(f.handler.handle(&delivery(&event, 2)).await, Disposition::Ack);
        assert_eq!(outcomes(&f.bus)[0].1, AgeComputed::done(event.person_id, 26));
    }

    #[tokio::test]
    async fn unreadable_envelope_is_dropped() {
        let f = fixture(5);
        let envelope = SerializedEvent::new(
            "PersonCreated.v1".to_string(),
            vec![0xff],
            EventMetadata::default(),
        );
        let (poison, _rx) = Delivery::new("person-created-topic", "k", envelope, 1);

        assert_eq!(f.handler.handle(&poison).await, Disposition::Ack);
        assert!(outcomes(&f.bus).is_empty());
        assert!(f.store.is_empty().await);
    }
}
