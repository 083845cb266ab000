//! Database operations for the `companies` table.
//!
//! Companies are managed by the account service; the pipeline only reads
//! them. `create_company` exists for seeding and tests.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `companies` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CompanyRow {
    pub id: i64,
    pub public_id: Uuid,
    pub name: String,
    pub website: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inserts a company and returns the full row.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_company(
    pool: &PgPool,
    name: &str,
    website: Option<&str>,
) -> Result<CompanyRow, DbError> {
    let row = sqlx::query_as::<_, CompanyRow>(
        "INSERT INTO companies (public_id, name, website) \
         VALUES ($1, $2, $3) \
         RETURNING id, public_id, name, website, created_at, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(website)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches a company by internal id, or `None` if it does not exist.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_company(pool: &PgPool, id: i64) -> Result<Option<CompanyRow>, DbError> {
    let row = sqlx::query_as::<_, CompanyRow>(
        "SELECT id, public_id, name, website, created_at, updated_at \
         FROM companies WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Fetches a company by its public UUID, or `None` if it does not exist.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_company_by_public_id(
    pool: &PgPool,
    public_id: Uuid,
) -> Result<Option<CompanyRow>, DbError> {
    let row = sqlx::query_as::<_, CompanyRow>(
        "SELECT id, public_id, name, website, created_at, updated_at \
         FROM companies WHERE public_id = $1",
    )
    .bind(public_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
