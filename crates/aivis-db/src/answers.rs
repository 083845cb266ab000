//! Database operations for the `answers` table.

use aivis_core::{AnswerStatus, TokenUsage};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `answers` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnswerRow {
    pub id: i64,
    pub run_id: i64,
    pub question_id: i64,
    pub model_id: String,
    pub status: String,
    pub raw_text: Option<String>,
    pub tagged_text: Option<String>,
    pub error_message: Option<String>,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub tokens_cached: i64,
    pub tokens_thinking: i64,
    pub search_count: i64,
    pub web_search_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl AnswerRow {
    /// Parsed `status` column.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Corrupt`] if the stored value is not a known status.
    pub fn answer_status(&self) -> Result<AnswerStatus, DbError> {
        Ok(self.status.parse()?)
    }
}

/// Values for a new answer row. A failed answer carries `error_message` and
/// no text.
#[derive(Debug, Clone)]
pub struct NewAnswer<'a> {
    pub run_id: i64,
    pub question_id: i64,
    pub model_id: &'a str,
    pub status: AnswerStatus,
    pub raw_text: Option<&'a str>,
    pub error_message: Option<&'a str>,
    pub usage: TokenUsage,
    pub web_search_enabled: bool,
}

/// Inserts an answer and returns its id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails, including when a
/// succeeded answer has no text or the `(run, question, model)` pair
/// already has an answer.
pub async fn insert_answer(pool: &PgPool, answer: &NewAnswer<'_>) -> Result<i64, DbError> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO answers \
             (run_id, question_id, model_id, status, raw_text, error_message, \
              tokens_in, tokens_out, tokens_cached, tokens_thinking, search_count, \
              web_search_enabled) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING id",
    )
    .bind(answer.run_id)
    .bind(answer.question_id)
    .bind(answer.model_id)
    .bind(answer.status.as_str())
    .bind(answer.raw_text)
    .bind(answer.error_message)
    .bind(answer.usage.input_tokens)
    .bind(answer.usage.output_tokens)
    .bind(answer.usage.cached_tokens)
    .bind(answer.usage.thinking_tokens)
    .bind(answer.usage.searches)
    .bind(answer.web_search_enabled)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Stores the tagger's output for an answer.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the answer does not exist, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn set_tagged_text(pool: &PgPool, answer_id: i64, tagged_text: &str) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE answers SET tagged_text = $1 WHERE id = $2")
        .bind(tagged_text)
        .bind(answer_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

/// Returns every answer of a run ordered by question then model.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_answers_for_run(pool: &PgPool, run_id: i64) -> Result<Vec<AnswerRow>, DbError> {
    let rows = sqlx::query_as::<_, AnswerRow>(
        "SELECT id, run_id, question_id, model_id, status, raw_text, tagged_text, \
                error_message, tokens_in, tokens_out, tokens_cached, tokens_thinking, \
                search_count, web_search_enabled, created_at \
         FROM answers \
         WHERE run_id = $1 \
         ORDER BY question_id, model_id",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
