//! Database operations for the `competitors` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `competitors` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CompetitorRow {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub website: Option<String>,
    pub is_generated: bool,
    pub created_at: DateTime<Utc>,
}

/// Returns every competitor tracked for `company_id`, ordered by name.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_competitors(pool: &PgPool, company_id: i64) -> Result<Vec<CompetitorRow>, DbError> {
    let rows = sqlx::query_as::<_, CompetitorRow>(
        "SELECT id, company_id, name, website, is_generated, created_at \
         FROM competitors \
         WHERE company_id = $1 \
         ORDER BY lower(name), id",
    )
    .bind(company_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Inserts a competitor unless one with the same name (case-insensitive)
/// already exists for the company.
///
/// Returns the new row, or `None` when the name was already present. Safe
/// under concurrent runs: the unique index on `(company_id, lower(name))`
/// arbitrates.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_competitor_if_absent(
    pool: &PgPool,
    company_id: i64,
    name: &str,
    website: Option<&str>,
    is_generated: bool,
) -> Result<Option<CompetitorRow>, DbError> {
    let row = sqlx::query_as::<_, CompetitorRow>(
        "INSERT INTO competitors (company_id, name, website, is_generated) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (company_id, lower(name)) DO NOTHING \
         RETURNING id, company_id, name, website, is_generated, created_at",
    )
    .bind(company_id)
    .bind(name.trim())
    .bind(website)
    .bind(is_generated)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Inserts enrichment-discovered competitors, returning only the rows that
/// were actually created.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any insert fails.
pub async fn insert_generated_competitors(
    pool: &PgPool,
    company_id: i64,
    names: &[String],
) -> Result<Vec<CompetitorRow>, DbError> {
    let mut created = Vec::new();
    for name in names {
        if let Some(row) = insert_competitor_if_absent(pool, company_id, name, None, true).await? {
            created.push(row);
        }
    }
    Ok(created)
}
