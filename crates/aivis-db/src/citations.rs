//! Database operations for the `citations` table.

use aivis_core::CitationSource;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `citations` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CitationRow {
    pub id: i64,
    pub answer_id: i64,
    pub url: String,
    pub normalized_url: String,
    pub domain: String,
    pub title: String,
    pub source_kind: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCitation<'a> {
    pub url: &'a str,
    pub normalized_url: &'a str,
    pub domain: &'a str,
    pub title: &'a str,
    pub source_kind: CitationSource,
}

/// Inserts the citations of one answer, skipping normalized URLs the answer
/// already has. Returns the number of rows written.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any insert fails; nothing is written then.
pub async fn insert_citations(
    pool: &PgPool,
    answer_id: i64,
    citations: &[NewCitation<'_>],
) -> Result<u64, DbError> {
    if citations.is_empty() {
        return Ok(0);
    }

    let mut inserted = 0;
    let mut tx = pool.begin().await?;
    for citation in citations {
        let result = sqlx::query(
            "INSERT INTO citations \
                 (answer_id, url, normalized_url, domain, title, source_kind) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (answer_id, normalized_url) DO NOTHING",
        )
        .bind(answer_id)
        .bind(citation.url)
        .bind(citation.normalized_url)
        .bind(citation.domain)
        .bind(citation.title)
        .bind(citation.source_kind.as_str())
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }
    tx.commit().await?;

    Ok(inserted)
}

/// Returns the citations of an answer in extraction order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_citations_for_answer(
    pool: &PgPool,
    answer_id: i64,
) -> Result<Vec<CitationRow>, DbError> {
    let rows = sqlx::query_as::<_, CitationRow>(
        "SELECT id, answer_id, url, normalized_url, domain, title, source_kind, created_at \
         FROM citations \
         WHERE answer_id = $1 \
         ORDER BY id",
    )
    .bind(answer_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
