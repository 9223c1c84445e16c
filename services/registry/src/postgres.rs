//! `PostgreSQL` person store.
//!
//! One row per person in `persons`; `upsert` is a single
//! `INSERT ... ON CONFLICT (id) DO UPDATE` statement, so concurrent writers
//! of the same id never produce two rows.

use crate::domain::{Person, ProcessingStatus};
use crate::store::PersonStore;
use age_saga_contracts::PersonId;
use age_saga_core::store::StoreError;
use age_saga_postgres::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Uuid;

const COLUMNS: &str =
    "id, last_name, first_name, address, birth_date, phone, status, age, created_at, updated_at";

/// Persons in the `persons` table.
#[derive(Clone, Debug)]
pub struct PostgresPersonStore {
    pool: PgPool,
}

impl PostgresPersonStore {
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

fn from_row(row: &PgRow) -> Result<Person, StoreError> {
    let id: Uuid = row.try_get("id").map_err(map_sqlx_error)?;
    let status: String = row.try_get("status").map_err(map_sqlx_error)?;
    let age: Option<i32> = row.try_get("age").map_err(map_sqlx_error)?;

    Ok(Person {
        id: PersonId::from_uuid(id),
        last_name: row.try_get("last_name").map_err(map_sqlx_error)?,
        first_name: row.try_get("first_name").map_err(map_sqlx_error)?,
        address: row.try_get("address").map_err(map_sqlx_error)?,
        birth_date: row.try_get("birth_date").map_err(map_sqlx_error)?,
        phone: row.try_get("phone").map_err(map_sqlx_error)?,
        status: status
            .parse::<ProcessingStatus>()
            .map_err(|e| StoreError::Corrupt(format!("person {id}: {e}")))?,
        age: age
            .map(u32::try_from)
            .transpose()
            .map_err(|_| StoreError::Corrupt(format!("person {id}: negative age")))?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx_error)?,
    })
}

#[async_trait]
impl PersonStore for PostgresPersonStore {
    async fn find(&self, id: PersonId) -> Result<Option<Person>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM persons WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(from_row).transpose()
    }

    async fn upsert(&self, person: &Person) -> Result<(), StoreError> {
        let age = person
            .age
            .map(i32::try_from)
            .transpose()
            .map_err(|_| StoreError::Rejected(format!("age of {} out of range", person.id)))?;

        sqlx::query(&format!(
            r"
            INSERT INTO persons ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                last_name = EXCLUDED.last_name,
                first_name = EXCLUDED.first_name,
                address = EXCLUDED.address,
                birth_date = EXCLUDED.birth_date,
                phone = EXCLUDED.phone,
                status = EXCLUDED.status,
                age = EXCLUDED.age,
                updated_at = EXCLUDED.updated_at
            "
        ))
        .bind(*person.id.as_uuid())
        .bind(&person.last_name)
        .bind(&person.first_name)
        .bind(&person.address)
        .bind(person.birth_date)
        .bind(&person.phone)
        .bind(person.status.as_str())
        .bind(age)
        .bind(person.created_at)
        .bind(person.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn list_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Person>, StoreError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {COLUMNS} FROM persons
            WHERE status = 'PENDING' AND created_at < $1
            ORDER BY created_at, id
            LIMIT $2
            "
        ))
        .bind(created_before)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(from_row).collect()
    }
}
