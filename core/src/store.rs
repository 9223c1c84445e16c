//! Error vocabulary shared by every persistence adapter.
//!
//! Consumers decide between redelivery and a terminal outcome based on
//! [`StoreError::is_transient`], so each adapter must classify its failures
//! into one of these variants.

use thiserror::Error;

/// Errors returned by service stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or timed out. Retrying later may succeed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write (constraint violation, invalid value).
    #[error("Store rejected the operation: {0}")]
    Rejected(String),

    /// A stored row could not be decoded into the domain type.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether the same operation may succeed when retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
