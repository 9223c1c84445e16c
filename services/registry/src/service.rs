//! Person creation and lookup.
//!
//! Creating a person is two steps that are not atomic with each other:
//!
//! 1. the `PENDING` record is written
//! 2. `PersonCreated` is published
//!
//! If step 2 fails the caller gets [`RegistryError::PublishFailed`] and the
//! record stays `PENDING`. [`RegistryService::republish_pending`] is the
//! recovery path for such records.

use crate::domain::{NewPerson, Person, ValidationError};
use crate::store::PersonStore;
use age_saga_contracts::{PersonCreated, PersonId};
use age_saga_core::environment::Clock;
use age_saga_core::event::EventMetadata;
use age_saga_core::store::StoreError;
use age_saga_runtime::metrics::SagaMetrics;
use age_saga_runtime::publisher::{EventPublisher, PublishError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Name under which the registry signs its events.
pub const SOURCE: &str = "registry-service";

/// Errors of the registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The create request is invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The person store failed.
    #[error("Person store failed: {0}")]
    Store(#[from] StoreError),

    /// The person was saved but `PersonCreated` could not be published.
    #[error("Person {person_id} was saved but its age computation could not be requested")]
    PublishFailed {
        /// The saved person
        person_id: PersonId,
        /// Publisher failure
        #[source]
        source: PublishError,
    },
}

/// Registry operations shared by the HTTP API and the republish sweep.
#[derive(Clone)]
pub struct RegistryService {
    store: Arc<dyn PersonStore>,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    topic: String,
}

impl RegistryService {
    /// Create the service publishing `PersonCreated` to `topic`.
    #[must_use]
    pub fn new(
        store: Arc<dyn PersonStore>,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            topic: topic.into(),
        }
    }

    /// Create a `PENDING` person and request its age.
    ///
    /// `correlation_id` is carried in the event metadata and follows the
    /// saga into the `AgeComputed` reply.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Validation`] for an invalid request,
    /// [`RegistryError::Store`] if the record cannot be written and
    /// [`RegistryError::PublishFailed`] if it was written but the event
    /// could not be published.
    pub async fn create(
        &self,
        request: NewPerson,
        correlation_id: Option<String>,
    ) -> Result<Person, RegistryError> {
        let person = Person::create(PersonId::new(), request, self.clock.now())?;
        self.store.upsert(&person).await?;
        SagaMetrics::record_person_created();
        info!(person_id = %person.id, "Person created");

        let mut metadata = EventMetadata::new(SOURCE, self.clock.now());
        if let Some(correlation_id) = correlation_id {
            metadata = metadata.with_correlation_id(correlation_id);
        }
        self.publish(&person, metadata)
            .await
            .map_err(|source| RegistryError::PublishFailed {
                person_id: person.id,
                source,
            })?;

        Ok(person)
    }

    /// Look up a person.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Store`] if the store fails.
    pub async fn find(&self, id: PersonId) -> Result<Option<Person>, RegistryError> {
        Ok(self.store.find(id).await?)
    }

    /// Publish `PersonCreated` again for up to `limit` persons that have been
    /// `PENDING` for longer than `older_than`.
    ///
    /// Stops at the first publish failure. Returns how many were published.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Store`] if the pending persons cannot be listed and
    /// [`RegistryError::PublishFailed`] for the first person whose event
    /// could not be published.
    pub async fn republish_pending(
        &self,
        older_than: Duration,
        limit: u32,
    ) -> Result<u64, RegistryError> {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| self.clock.now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            // No record can be older than the clock allows.
            return Ok(0);
        };
        let stuck = self.store.list_pending(cutoff, limit).await?;

        let mut published = 0;
        for person in stuck {
            let metadata = EventMetadata::new(SOURCE, self.clock.now())
                .with_causation_id(format!("republish/{}", person.id));
            self.publish(&person, metadata)
                .await
                .map_err(|source| RegistryError::PublishFailed {
                    person_id: person.id,
                    source,
                })?;
            published += 1;
        }

        if published > 0 {
            SagaMetrics::record_republished(published);
            info!(count = published, "PersonCreated republished for pending persons");
        }
        Ok(published)
    }

    async fn publish(&self, person: &Person, metadata: EventMetadata) -> Result<(), PublishError> {
        let event = PersonCreated::new(person.id, person.birth_date);
        self.publisher
            .publish(&self.topic, &person.id.partition_key(), &event, metadata)
            .await
    }
}

/// Settings of the republish sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Minimum time a person must have been `PENDING`
    pub older_than: Duration,
    /// Maximum persons republished per sweep
    pub batch_size: u32,
}

/// Run [`RegistryService::republish_pending`] every `config.interval` until
/// shutdown.
#[must_use]
pub fn spawn_republish_sweep(
    service: RegistryService,
    config: SweepConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = config.interval.as_secs(),
            older_than_secs = config.older_than.as_secs(),
            "Republish sweep started"
        );
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    match service.republish_pending(config.older_than, config.batch_size).await {
                        Ok(_) => {}
                        Err(e @ RegistryError::PublishFailed { .. }) => {
                            warn!(error = %e, "Republish sweep interrupted");
                        }
                        Err(e) => error!(error = %e, "Republish sweep failed"),
                    }
                }
            }
        }
        info!("Republish sweep stopped");
    })
}
