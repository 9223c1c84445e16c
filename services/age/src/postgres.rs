//! `PostgreSQL` derived age store.
//!
//! ```sql
//! CREATE TABLE person_ages (
//!     person_id     UUID PRIMARY KEY,
//!     birth_date    DATE NOT NULL,
//!     age           INTEGER NOT NULL,
//!     calculated_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! The primary key makes `INSERT ... ON CONFLICT DO NOTHING` the idempotency
//! guard: concurrent deliveries of the same event cannot create two rows.

use crate::domain::DerivedAge;
use crate::store::{DerivedAgeStore, InsertOutcome};
use age_saga_contracts::PersonId;
use age_saga_core::store::StoreError;
use age_saga_postgres::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Uuid;

/// Derived ages in the `person_ages` table.
#[derive(Clone, Debug)]
pub struct PostgresDerivedAgeStore {
    pool: PgPool,
}

impl PostgresDerivedAgeStore {
    /// Create a store over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if a migration cannot be applied.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))
    }
}

fn from_row(row: &PgRow) -> Result<DerivedAge, StoreError> {
    let person_id: Uuid = row.try_get("person_id").map_err(map_sqlx_error)?;
    let birth_date: NaiveDate = row.try_get("birth_date").map_err(map_sqlx_error)?;
    let age: i32 = row.try_get("age").map_err(map_sqlx_error)?;
    let calculated_at: DateTime<Utc> = row.try_get("calculated_at").map_err(map_sqlx_error)?;

    Ok(DerivedAge {
        person_id: PersonId::from_uuid(person_id),
        birth_date,
        age: u32::try_from(age)
            .map_err(|_| StoreError::Corrupt(format!("negative age {age} for {person_id}")))?,
        calculated_at,
    })
}

#[async_trait]
impl DerivedAgeStore for PostgresDerivedAgeStore {
    async fn insert_if_absent(&self, record: &DerivedAge) -> Result<InsertOutcome, StoreError> {
        let age = i32::try_from(record.age)
            .map_err(|_| StoreError::Rejected(format!("age {} out of range", record.age)))?;

        let inserted = sqlx::query(
            r"
            INSERT INTO person_ages (person_id, birth_date, age, calculated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (person_id) DO NOTHING
            ",
        )
        .bind(*record.person_id.as_uuid())
        .bind(record.birth_date)
        .bind(age)
        .bind(record.calculated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        if inserted == 1 {
            return Ok(InsertOutcome::Inserted);
        }

        // Rows are never deleted, so the conflicting row is still there.
        self.find(record.person_id)
            .await?
            .map(InsertOutcome::AlreadyPresent)
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "conflicting row for {} disappeared",
                    record.person_id
                ))
            })
    }

    async fn find(&self, person_id: PersonId) -> Result<Option<DerivedAge>, StoreError> {
        let row = sqlx::query(
            "SELECT person_id, birth_date, age, calculated_at FROM person_ages WHERE person_id = $1",
        )
        .bind(*person_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(from_row).transpose()
    }
}
