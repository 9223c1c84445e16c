//! # Age Saga Contracts
//!
//! The only things the registry and age services share: the person identifier,
//! the two events they exchange, and the names of the topics and consumer
//! groups those events travel on.
//!
//! ```text
//! Registry ── PersonCreated { person_id, birth_date } ──► Age
//! Registry ◄── AgeComputed { person_id, age, status } ─── Age
//! ```
//!
//! Both events are published with the person identifier as partition key, so
//! every event about one person stays ordered within its topic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

mod events;

pub use events::{AgeComputed, AgeOutcome, ComputationStatus, PersonCreated};

/// Topic and consumer group names.
pub mod topics {
    /// Topic carrying [`PersonCreated`](crate::PersonCreated) events.
    pub const PERSON_CREATED: &str = "person-created-topic";

    /// Topic carrying [`AgeComputed`](crate::AgeComputed) events.
    pub const AGE_COMPUTED: &str = "age-calculated-topic";

    /// Consumer group of the age service.
    pub const AGE_SERVICE_GROUP: &str = "age-service";

    /// Consumer group of the registry service.
    pub const REGISTRY_SERVICE_GROUP: &str = "registry-service";
}

/// Contract violations found when validating an incoming event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    /// A `DONE` outcome must carry the computed age.
    #[error("DONE outcome for person {0} carries no age")]
    DoneWithoutAge(PersonId),

    /// A `FAILED` outcome must not carry an age.
    #[error("FAILED outcome for person {person_id} carries age {age}")]
    FailedWithAge {
        /// Person the event refers to
        person_id: PersonId,
        /// Unexpected age
        age: u32,
    },

    /// The string is not a valid person identifier.
    #[error("Invalid person id '{0}'")]
    InvalidPersonId(String),
}

/// Opaque unique identifier of a person, generated by the registry on creation.
///
/// The string form is the partition key of both topics.
///
/// # Examples
///
/// ```
/// use age_saga_contracts::PersonId;
///
/// let id = PersonId::new();
/// let parsed: PersonId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(Uuid);

impl PersonId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Partition key used when publishing events about this person.
    #[must_use]
    pub fn partition_key(&self) -> String {
        self.0.to_string()
    }
}

impl Default for PersonId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PersonId {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ContractError::InvalidPersonId(s.to_string()))
    }
}

impl From<Uuid> for PersonId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
