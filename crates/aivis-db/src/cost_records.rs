//! Database operations for `cost_records`.

use aivis_core::{InvocationKind, TokenUsage};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::DbError;

/// A row from the `cost_records` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CostRecordRow {
    pub id: i64,
    pub run_id: i64,
    pub answer_id: Option<i64>,
    pub invocation: String,
    pub model_id: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cached_tokens: i64,
    pub thinking_tokens: i64,
    pub searches: i64,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub thinking_cost: Decimal,
    pub caching_cost: Decimal,
    pub search_cost: Decimal,
    pub total_cost: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Values for one priced invocation.
#[derive(Debug, Clone)]
pub struct NewCostRecord<'a> {
    pub run_id: i64,
    pub answer_id: Option<i64>,
    pub invocation: InvocationKind,
    pub model_id: &'a str,
    pub usage: TokenUsage,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub thinking_cost: Decimal,
    pub caching_cost: Decimal,
    pub search_cost: Decimal,
    pub total_cost: Decimal,
}

/// Aggregate of every cost record in a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct RunCostTotals {
    pub usd_cost: Decimal,
    pub tokens_used: i64,
    pub records: i64,
}

/// Inserts a cost record and returns its id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_cost_record(pool: &PgPool, record: &NewCostRecord<'_>) -> Result<i64, DbError> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO cost_records \
             (run_id, answer_id, invocation, model_id, \
              input_tokens, output_tokens, cached_tokens, thinking_tokens, searches, \
              input_cost, output_cost, thinking_cost, caching_cost, search_cost, total_cost) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
         RETURNING id",
    )
    .bind(record.run_id)
    .bind(record.answer_id)
    .bind(record.invocation.as_str())
    .bind(record.model_id)
    .bind(record.usage.input_tokens)
    .bind(record.usage.output_tokens)
    .bind(record.usage.cached_tokens)
    .bind(record.usage.thinking_tokens)
    .bind(record.usage.searches)
    .bind(record.input_cost)
    .bind(record.output_cost)
    .bind(record.thinking_cost)
    .bind(record.caching_cost)
    .bind(record.search_cost)
    .bind(record.total_cost)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Sums cost and tokens over every persisted record of a run.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn sum_run_costs(pool: &PgPool, run_id: i64) -> Result<RunCostTotals, DbError> {
    let totals = sqlx::query_as::<_, RunCostTotals>(
        "SELECT COALESCE(SUM(total_cost), 0) AS usd_cost, \
                COALESCE(SUM(input_tokens + output_tokens + cached_tokens + thinking_tokens), 0)::BIGINT \
                    AS tokens_used, \
                COUNT(*) AS records \
         FROM cost_records \
         WHERE run_id = $1",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await?;

    Ok(totals)
}

/// Returns every cost record of a run in insertion order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_cost_records_for_run(
    pool: &PgPool,
    run_id: i64,
) -> Result<Vec<CostRecordRow>, DbError> {
    let rows = sqlx::query_as::<_, CostRecordRow>(
        "SELECT id, run_id, answer_id, invocation, model_id, input_tokens, output_tokens, \
                cached_tokens, thinking_tokens, searches, input_cost, output_cost, \
                thinking_cost, caching_cost, search_cost, total_cost, created_at \
         FROM cost_records \
         WHERE run_id = $1 \
         ORDER BY id",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
