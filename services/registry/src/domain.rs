//! Person records and their processing status.

use age_saga_contracts::{AgeOutcome, ComputationStatus, PersonId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Where a person stands in the age saga.
///
/// Moves from `Pending` to `Done` or `Failed` and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    /// Waiting for the age service.
    Pending,
    /// Age computed.
    Done,
    /// Age could not be computed.
    Failed,
}

impl ProcessingStatus {
    /// Stored and serialized name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    /// Whether the saga has finished for this person.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl From<ComputationStatus> for ProcessingStatus {
    fn from(status: ComputationStatus) -> Self {
        match status {
            ComputationStatus::Done => Self::Done,
            ComputationStatus::Failed => Self::Failed,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown status name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown processing status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ProcessingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A person record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Identifier, generated on creation
    pub id: PersonId,
    /// Family name
    pub last_name: String,
    /// Given name
    pub first_name: String,
    /// Postal address
    pub address: Option<String>,
    /// Date of birth
    pub birth_date: NaiveDate,
    /// Phone number
    pub phone: Option<String>,
    /// Saga progress
    pub status: ProcessingStatus,
    /// Age in whole years, set once the saga is `DONE`
    pub age: Option<u32>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl Person {
    /// Validate `request` into a new `Pending` person.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for a blank name or a missing birth date.
    pub fn create(
        id: PersonId,
        request: NewPerson,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            id,
            last_name: required(request.last_name, "last_name")?,
            first_name: required(request.first_name, "first_name")?,
            address: optional(request.address),
            birth_date: request.birth_date.ok_or(ValidationError::MissingBirthDate)?,
            phone: optional(request.phone),
            status: ProcessingStatus::Pending,
            age: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// The outcome already applied, if the saga has finished.
    #[must_use]
    pub const fn outcome(&self) -> Option<AgeOutcome> {
        match (self.status, self.age) {
            (ProcessingStatus::Done, Some(age)) => Some(AgeOutcome::Done { age }),
            (ProcessingStatus::Failed, _) => Some(AgeOutcome::Failed),
            _ => None,
        }
    }

    /// Record `outcome` as the saga result.
    pub fn apply(&mut self, outcome: AgeOutcome, now: DateTime<Utc>) {
        self.status = outcome.status().into();
        self.age = outcome.age();
        self.updated_at = now;
    }
}

/// Body of a create request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPerson {
    /// Family name
    #[serde(default)]
    pub last_name: String,
    /// Given name
    #[serde(default)]
    pub first_name: String,
    /// Postal address
    #[serde(default)]
    pub address: Option<String>,
    /// Date of birth
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    /// Phone number
    #[serde(default)]
    pub phone: Option<String>,
}

/// Why a create request was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required text field is empty.
    #[error("{0} must not be blank")]
    Blank(&'static str),

    /// No birth date was given.
    #[error("birth_date is required")]
    MissingBirthDate,
}

fn required(value: String, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Blank(field));
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
