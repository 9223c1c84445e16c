//! Applying `AgeComputed` outcomes to person records.
//!
//! [`reconcile`] is the pure merge rule; [`AgeComputedHandler`] does the
//! lookup, the write and the bookkeeping around it.
//!
//! | Person            | Incoming outcome | Result                          |
//! |-------------------|------------------|---------------------------------|
//! | unknown           | any              | discarded                       |
//! | `PENDING`         | any              | applied                         |
//! | `DONE`/`FAILED`   | same             | duplicate, nothing written      |
//! | `DONE`/`FAILED`   | different        | divergent, overwritten + warned |
//!
//! Status never returns to `PENDING`: an outcome is always terminal.

use crate::domain::Person;
use crate::store::PersonStore;
use age_saga_contracts::{AgeComputed, AgeOutcome};
use age_saga_core::environment::Clock;
use age_saga_core::event_bus::Delivery;
use age_saga_core::store::StoreError;
use age_saga_runtime::handler::{Disposition, EventHandler};
use age_saga_runtime::metrics::{ConsumerMetrics, SagaMetrics};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What [`reconcile`] did to a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The outcome was recorded on a pending person.
    Applied,
    /// The same outcome was already recorded.
    Duplicate,
    /// A different outcome was recorded before and has been replaced.
    Divergent {
        /// Outcome that was replaced
        previous: AgeOutcome,
    },
}

impl Reconciliation {
    /// Metric label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::Divergent { .. } => "divergent",
        }
    }

    /// Whether the person was modified and must be written back.
    #[must_use]
    pub const fn changed(&self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

/// Merge `outcome` into `person`.
pub fn reconcile(person: &mut Person, outcome: AgeOutcome, now: DateTime<Utc>) -> Reconciliation {
    match person.outcome() {
        Some(previous) if previous == outcome => Reconciliation::Duplicate,
        Some(previous) => {
            person.apply(outcome, now);
            Reconciliation::Divergent { previous }
        }
        None => {
            person.apply(outcome, now);
            Reconciliation::Applied
        }
    }
}

const CONSUMER: &str = "registry-service";

/// Applies `AgeComputed` deliveries to the person store.
pub struct AgeComputedHandler {
    store: Arc<dyn PersonStore>,
    clock: Arc<dyn Clock>,
}

impl AgeComputedHandler {
    /// Create a handler writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn PersonStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl EventHandler for AgeComputedHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let event: AgeComputed = match delivery.event.decode(AgeComputed::EVENT_TYPE) {
            Ok(event) => event,
            Err(e) => {
                ConsumerMetrics::record_poison(CONSUMER);
                error!(
                    key = %delivery.key,
                    event_type = %delivery.event.event_type,
                    error = %e,
                    "Dropping unreadable AgeComputed delivery"
                );
                return Disposition::Ack;
            }
        };
        let person_id = event.person_id;

        let outcome = match event.outcome() {
            Ok(outcome) => outcome,
            Err(e) => {
                SagaMetrics::record_reconciliation("invalid");
                warn!(%person_id, error = %e, "Discarding inconsistent AgeComputed");
                return Disposition::Ack;
            }
        };

        let mut person = match self.store.find(person_id).await {
            Ok(Some(person)) => person,
            Ok(None) => {
                SagaMetrics::record_reconciliation("discarded");
                info!(%person_id, "AgeComputed for unknown person discarded");
                return Disposition::Ack;
            }
            Err(e) => return store_failure(&e, "lookup"),
        };

        let result = reconcile(&mut person, outcome, self.clock.now());
        if result.changed() {
            if let Err(e) = self.store.upsert(&person).await {
                return store_failure(&e, "write");
            }
        }

        SagaMetrics::record_reconciliation(result.label());
        match result {
            Reconciliation::Applied => {
                info!(
                    %person_id,
                    status = %person.status,
                    age = ?person.age,
                    "Age outcome applied"
                );
            }
            Reconciliation::Duplicate => {
                info!(%person_id, status = %person.status, "Duplicate age outcome ignored");
            }
            Reconciliation::Divergent { previous } => {
                warn!(
                    %person_id,
                    previous_status = %previous.status(),
                    previous_age = ?previous.age(),
                    status = %person.status,
                    age = ?person.age,
                    "Age outcome differs from the recorded one, overwriting"
                );
            }
        }
        Disposition::Ack
    }
}

fn store_failure(e: &StoreError, step: &str) -> Disposition {
    if e.is_transient() {
        return Disposition::redeliver(format!("person {step} failed: {e}"));
    }
    SagaMetrics::record_reconciliation("failed");
    error!(step, error = %e, "Age outcome could not be applied");
    Disposition::Ack
}
