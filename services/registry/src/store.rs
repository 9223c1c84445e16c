//! Person storage.

use crate::domain::{Person, ProcessingStatus};
use age_saga_contracts::PersonId;
use age_saga_core::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

/// Persistence of [`Person`] records.
#[async_trait]
pub trait PersonStore: Send + Sync {
    /// Look up a person.
    async fn find(&self, id: PersonId) -> Result<Option<Person>, StoreError>;

    /// Insert or replace the record with the same id. Atomic per id.
    async fn upsert(&self, person: &Person) -> Result<(), StoreError>;

    /// Up to `limit` persons still `PENDING` that were created before
    /// `created_before`, oldest first.
    async fn list_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Person>, StoreError>;
}

/// In-memory store used by tests and by the binary without a database.
#[derive(Debug, Default)]
pub struct InMemoryPersonStore {
    rows: RwLock<HashMap<PersonId, Person>>,
    failures_left: AtomicU32,
}

impl InMemoryPersonStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with [`StoreError::Unavailable`].
    pub fn fail_next_writes(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Number of stored persons.
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
impl PersonStore for InMemoryPersonStore {
    async fn find(&self, id: PersonId) -> Result<Option<Person>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn upsert(&self, person: &Person) -> Result<(), StoreError> {
        if self.take_failure() {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        self.rows.write().await.insert(person.id, person.clone());
        Ok(())
    }

    async fn list_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Person>, StoreError> {
        let rows = self.rows.read().await;
        let mut pending: Vec<Person> = rows
            .values()
            .filter(|p| p.status == ProcessingStatus::Pending && p.created_at < created_before)
            .cloned()
            .collect();
        pending.sort_by_key(|p| (p.created_at, p.id));
        pending.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(pending)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::domain::NewPerson;
    use age_saga_contracts::AgeOutcome;
    use age_saga_core::environment::Clock;
    use age_saga_testing::test_clock;
    use chrono::{Duration, NaiveDate};

    fn person(created_at: DateTime<Utc>) -> Person {
        Person::create(
            PersonId::new(),
            NewPerson {
                last_name: "Durand".to_string(),
                first_name: "Marie".to_string(),
                birth_date: NaiveDate::from_ymd_opt(1990, 5, 15),
                ..NewPerson::default()
            },
            created_at,
        )
        .expect("valid")
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryPersonStore::new();
        let mut p = person(test_clock().now());
        store.upsert(&p).await.expect("insert");

        p.apply(AgeOutcome::Done { age: 35 }, test_clock().now());
        store.upsert(&p).await.expect("update");

        assert_eq!(store.len().await, 1);
        assert_eq!(store.find(p.id).await.expect("find"), Some(p));
    }

    #[tokio::test]
    async fn list_pending_skips_recent_and_finished_persons() {
        let store = InMemoryPersonStore::new();
        let now = test_clock().now();

        let old = person(now - Duration::minutes(10));
        let older = person(now - Duration::minutes(20));
        let recent = person(now);
        let mut finished = person(now - Duration::minutes(30));
        finished.apply(AgeOutcome::Failed, now);
        for p in [&old, &older, &recent, &finished] {
            store.upsert(p).await.expect("upsert");
        }

        let pending = store
            .list_pending(now - Duration::minutes(5), 10)
            .await
            .expect("list");
        assert_eq!(pending, vec![older.clone(), old]);

        let first = store
            .list_pending(now - Duration::minutes(5), 1)
            .await
            .expect("list");
        assert_eq!(first, vec![older]);
    }

    #[tokio::test]
    async fn injected_failure_leaves_store_untouched() {
        let store = InMemoryPersonStore::new();
        store.fail_next_writes(1);
        let p = person(test_clock().now());

        assert!(store.upsert(&p).await.expect_err("injected").is_transient());
        assert!(store.is_empty().await);
    }
}
