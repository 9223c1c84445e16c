//! Age computation and the derived record it produces.

use age_saga_contracts::PersonId;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The age service's own record of a computed age.
///
/// Keyed by person id. The birth date is the one carried by the
/// `PersonCreated` event, copied at computation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAge {
    /// Person the age belongs to
    pub person_id: PersonId,
    /// Birth date used for the computation
    pub birth_date: NaiveDate,
    /// Whole years elapsed at `calculated_at`
    pub age: u32,
    /// When the age was computed
    pub calculated_at: DateTime<Utc>,
}

impl DerivedAge {
    /// Compute the record for `person_id` at `now` (UTC date).
    #[must_use]
    pub fn compute(person_id: PersonId, birth_date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            person_id,
            birth_date,
            age: compute_age(birth_date, now.date_naive()),
            calculated_at: now,
        }
    }
}

/// Why a birth date cannot be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The event carried no birth date.
    #[error("birth date is missing")]
    MissingBirthDate,

    /// The birth date is after the processing date.
    #[error("birth date {birth_date} is after {today}")]
    BirthDateInFuture {
        /// Offending birth date
        birth_date: NaiveDate,
        /// Processing date
        today: NaiveDate,
    },
}

/// Check that a birth date is present and not after `today`.
///
/// # Errors
///
/// Returns [`ValidationError`] describing the problem.
pub fn validate_birth_date(
    birth_date: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<NaiveDate, ValidationError> {
    let birth_date = birth_date.ok_or(ValidationError::MissingBirthDate)?;
    if birth_date > today {
        return Err(ValidationError::BirthDateInFuture { birth_date, today });
    }
    Ok(birth_date)
}

/// Whole years elapsed from `birth_date` to `today`.
///
/// One less than the calendar-year difference while this year's anniversary
/// is still ahead. A 29 February birthday falls on 1 March in common years.
/// Returns 0 when `birth_date` is after `today`.
#[must_use]
pub fn compute_age(birth_date: NaiveDate, today: NaiveDate) -> u32 {
    let mut years = today.year() - birth_date.year();
    if (today.month(), today.day()) < (birth_date.month(), birth_date.day()) {
        years -= 1;
    }
    u32::try_from(years).unwrap_or(0)
}
