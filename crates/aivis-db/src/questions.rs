//! Database operations for the `questions` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `questions` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QuestionRow {
    pub id: i64,
    pub company_id: i64,
    pub text: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Returns the company's active questions in creation order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_active_questions(
    pool: &PgPool,
    company_id: i64,
) -> Result<Vec<QuestionRow>, DbError> {
    let rows = sqlx::query_as::<_, QuestionRow>(
        "SELECT id, company_id, text, is_active, created_at \
         FROM questions \
         WHERE company_id = $1 AND is_active = true \
         ORDER BY id",
    )
    .bind(company_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Inserts a question. Used for seeding and tests.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_question(
    pool: &PgPool,
    company_id: i64,
    text: &str,
    is_active: bool,
) -> Result<QuestionRow, DbError> {
    let row = sqlx::query_as::<_, QuestionRow>(
        "INSERT INTO questions (company_id, text, is_active) \
         VALUES ($1, $2, $3) \
         RETURNING id, company_id, text, is_active, created_at",
    )
    .bind(company_id)
    .bind(text)
    .bind(is_active)
    .fetch_one(pool)
    .await?;

    Ok(row)
}
