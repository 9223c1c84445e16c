//! Derived age storage.
//!
//! The store enforces the "at most one derived age per person" rule:
//! [`DerivedAgeStore::insert_if_absent`] never overwrites and reports the row
//! that was already there.

use crate::domain::DerivedAge;
use age_saga_contracts::PersonId;
use age_saga_core::store::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

/// Result of [`DerivedAgeStore::insert_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was stored.
    Inserted,
    /// A record for the person already existed and was left untouched.
    AlreadyPresent(DerivedAge),
}

/// Persistence of [`DerivedAge`] records.
#[async_trait]
pub trait DerivedAgeStore: Send + Sync {
    /// Store `record` unless one exists for the same person.
    ///
    /// Atomic per person id.
    async fn insert_if_absent(&self, record: &DerivedAge) -> Result<InsertOutcome, StoreError>;

    /// Look up the record of `person_id`.
    async fn find(&self, person_id: PersonId) -> Result<Option<DerivedAge>, StoreError>;
}

/// In-memory store used by tests and by the binary without a database.
#[derive(Debug, Default)]
pub struct InMemoryDerivedAgeStore {
    rows: RwLock<HashMap<PersonId, DerivedAge>>,
    failures_left: AtomicU32,
}

impl InMemoryDerivedAgeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with [`StoreError::Unavailable`].
    pub fn fail_next_writes(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DerivedAgeStore for InMemoryDerivedAgeStore {
    async fn insert_if_absent(&self, record: &DerivedAge) -> Result<InsertOutcome, StoreError> {
        if self.take_failure() {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }

        let mut rows = self.rows.write().await;
        if let Some(existing) = rows.get(&record.person_id) {
            return Ok(InsertOutcome::AlreadyPresent(existing.clone()));
        }
        rows.insert(record.person_id, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn find(&self, person_id: PersonId) -> Result<Option<DerivedAge>, StoreError> {
        Ok(self.rows.read().await.get(&person_id).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use age_saga_core::environment::Clock;
    use age_saga_testing::test_clock;
    use chrono::NaiveDate;

    fn record(person_id: PersonId, year: i32) -> DerivedAge {
        DerivedAge::compute(
            person_id,
            NaiveDate::from_ymd_opt(year, 5, 15).expect("date"),
            test_clock().now(),
        )
    }

    #[tokio::test]
    async fn second_insert_keeps_the_first_record() {
        let store = InMemoryDerivedAgeStore::new();
        let id = PersonId::new();

        let first = record(id, 1990);
        assert_eq!(
            store.insert_if_absent(&first).await.expect("insert"),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_if_absent(&record(id, 1980)).await.expect("insert"),
            InsertOutcome::AlreadyPresent(first.clone())
        );
        assert_eq!(store.len().await, 1);
        assert_eq!(store.find(id).await.expect("find"), Some(first));
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let store = InMemoryDerivedAgeStore::new();
        store.fail_next_writes(1);

        let rec = record(PersonId::new(), 1990);
        let err = store.insert_if_absent(&rec).await.expect_err("injected");
        assert!(err.is_transient());
        assert!(store.is_empty().await);

        assert_eq!(
            store.insert_if_absent(&rec).await.expect("insert"),
            InsertOutcome::Inserted
        );
    }
}
