//! Database operations for the `mentions` table.

use aivis_core::{MentionKind, TagStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `mentions` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MentionRow {
    pub id: i64,
    pub answer_id: i64,
    pub name: String,
    pub kind: String,
    pub confidence: f64,
    pub context_snippet: Option<String>,
    pub char_offset: i64,
    pub tag_status: String,
    pub tag_detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMention<'a> {
    pub name: &'a str,
    pub kind: MentionKind,
    pub confidence: f64,
    pub context_snippet: Option<&'a str>,
    pub char_offset: i64,
    pub tag_status: TagStatus,
    pub tag_detail: Option<String>,
}

/// Inserts all mentions of one answer in a single transaction.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any insert fails; nothing is written then.
pub async fn insert_mentions(
    pool: &PgPool,
    answer_id: i64,
    mentions: &[NewMention<'_>],
) -> Result<(), DbError> {
    if mentions.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for mention in mentions {
        sqlx::query(
            "INSERT INTO mentions \
                 (answer_id, name, kind, confidence, context_snippet, char_offset, \
                  tag_status, tag_detail) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(answer_id)
        .bind(mention.name)
        .bind(mention.kind.as_str())
        .bind(mention.confidence)
        .bind(mention.context_snippet)
        .bind(mention.char_offset)
        .bind(mention.tag_status.as_str())
        .bind(mention.tag_detail.as_deref())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(())
}

/// Returns the mentions of an answer in text order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_mentions_for_answer(
    pool: &PgPool,
    answer_id: i64,
) -> Result<Vec<MentionRow>, DbError> {
    let rows = sqlx::query_as::<_, MentionRow>(
        "SELECT id, answer_id, name, kind, confidence, context_snippet, char_offset, \
                tag_status, tag_detail, created_at \
         FROM mentions \
         WHERE answer_id = $1 \
         ORDER BY char_offset, id",
    )
    .bind(answer_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
