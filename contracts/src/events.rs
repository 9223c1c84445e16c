use crate::{ContractError, PersonId};
use age_saga_core::event::Event;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A person record was created and is waiting for its age.
///
/// Published once per person by the registry; may be delivered more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonCreated {
    /// The new person.
    pub person_id: PersonId,
    /// Birth date as recorded by the registry.
    ///
    /// Optional on the wire so that a missing date reaches validation in the
    /// age service and yields a `FAILED` outcome instead of a poison message.
    pub birth_date: Option<NaiveDate>,
}

impl PersonCreated {
    /// Event type identifier.
    pub const EVENT_TYPE: &'static str = "PersonCreated.v1";

    /// Event for a person born on `birth_date`.
    #[must_use]
    pub const fn new(person_id: PersonId, birth_date: NaiveDate) -> Self {
        Self {
            person_id,
            birth_date: Some(birth_date),
        }
    }
}

impl Event for PersonCreated {
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }
}

/// Terminal status reported by the age service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComputationStatus {
    /// Age computed and stored.
    Done,
    /// Age could not be computed.
    Failed,
}

impl ComputationStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ComputationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an age computation for one person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeComputed {
    /// The person the computation was for.
    pub person_id: PersonId,
    /// Whole years; present exactly when `status` is `DONE`.
    pub age: Option<u32>,
    /// Outcome of the computation.
    pub status: ComputationStatus,
}

/// A validated [`AgeComputed`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeOutcome {
    /// The age was computed.
    Done {
        /// Whole years
        age: u32,
    },
    /// The computation failed.
    Failed,
}

impl AgeOutcome {
    /// Status matching this outcome.
    #[must_use]
    pub const fn status(&self) -> ComputationStatus {
        match self {
            Self::Done { .. } => ComputationStatus::Done,
            Self::Failed => ComputationStatus::Failed,
        }
    }

    /// Age carried by this outcome.
    #[must_use]
    pub const fn age(&self) -> Option<u32> {
        match self {
            Self::Done { age } => Some(*age),
            Self::Failed => None,
        }
    }
}

impl AgeComputed {
    /// Event type identifier.
    pub const EVENT_TYPE: &'static str = "AgeComputed.v1";

    /// Successful computation.
    #[must_use]
    pub const fn done(person_id: PersonId, age: u32) -> Self {
        Self {
            person_id,
            age: Some(age),
            status: ComputationStatus::Done,
        }
    }

    /// Failed computation; carries no age.
    #[must_use]
    pub const fn failed(person_id: PersonId) -> Self {
        Self {
            person_id,
            age: None,
            status: ComputationStatus::Failed,
        }
    }

    /// Validate the payload into an [`AgeOutcome`].
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::DoneWithoutAge`] or
    /// [`ContractError::FailedWithAge`] when status and age disagree.
    pub const fn outcome(&self) -> Result<AgeOutcome, ContractError> {
        match (self.status, self.age) {
            (ComputationStatus::Done, Some(age)) => Ok(AgeOutcome::Done { age }),
            (ComputationStatus::Done, None) => Err(ContractError::DoneWithoutAge(self.person_id)),
            (ComputationStatus::Failed, None) => Ok(AgeOutcome::Failed),
            (ComputationStatus::Failed, Some(age)) => Err(ContractError::FailedWithAge {
                person_id: self.person_id,
                age,
            }),
        }
    }
}

impl Event for AgeComputed {
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }
}
