//! Database operations for `report_runs`.
//!
//! Status transitions are guarded in SQL (`WHERE status = ...`); an update
//! that matches no row reports [`DbError::InvalidRunTransition`].

use aivis_core::RunStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

const RUN_COLUMNS: &str = "id, public_id, company_id, status, step_status, tokens_used, usd_cost, \
     trace_id, failed_answers, failed_questions, failed_detections, tagging_failures, \
     unpriced_invocations, error_message, created_at, started_at, completed_at, updated_at";

/// A row from the `report_runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReportRunRow {
    pub id: i64,
    pub public_id: Uuid,
    pub company_id: i64,
    pub status: String,
    pub step_status: Option<String>,
    pub tokens_used: i64,
    pub usd_cost: Decimal,
    pub trace_id: Option<Uuid>,
    pub failed_answers: i32,
    pub failed_questions: i32,
    pub failed_detections: i32,
    pub tagging_failures: i32,
    pub unpriced_invocations: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ReportRunRow {
    /// Parsed `status` column.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Corrupt`] if the stored value is not a known status.
    pub fn run_status(&self) -> Result<RunStatus, DbError> {
        Ok(self.status.parse()?)
    }

    #[must_use]
    pub fn counters(&self) -> RunCounters {
        RunCounters {
            failed_answers: self.failed_answers,
            failed_questions: self.failed_questions,
            failed_detections: self.failed_detections,
            tagging_failures: self.tagging_failures,
            unpriced_invocations: self.unpriced_invocations,
        }
    }
}

/// Partial-failure counts written when a run finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub failed_answers: i32,
    pub failed_questions: i32,
    pub failed_detections: i32,
    pub tagging_failures: i32,
    pub unpriced_invocations: i32,
}

/// Creates a run in `pending` status for `company_id`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails (including an unknown company).
pub async fn create_report_run(pool: &PgPool, company_id: i64) -> Result<ReportRunRow, DbError> {
    let row = sqlx::query_as::<_, ReportRunRow>(&format!(
        "INSERT INTO report_runs (public_id, company_id, status) \
         VALUES ($1, $2, 'pending') \
         RETURNING {RUN_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(company_id)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches a run by internal id, or `None` if it does not exist.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_report_run(pool: &PgPool, id: i64) -> Result<Option<ReportRunRow>, DbError> {
    let row = sqlx::query_as::<_, ReportRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM report_runs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Fetches a run by its public UUID, or `None` if it does not exist.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_report_run_by_public_id(
    pool: &PgPool,
    public_id: Uuid,
) -> Result<Option<ReportRunRow>, DbError> {
    let row = sqlx::query_as::<_, ReportRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM report_runs WHERE public_id = $1"
    ))
    .bind(public_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Returns the most recent `limit` runs for a company, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_report_runs(
    pool: &PgPool,
    company_id: i64,
    limit: i64,
) -> Result<Vec<ReportRunRow>, DbError> {
    let rows = sqlx::query_as::<_, ReportRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM report_runs \
         WHERE company_id = $1 \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2"
    ))
    .bind(company_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Moves a `pending` run to `running`, stamping `started_at` and `trace_id`.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not `pending`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn start_report_run(
    pool: &PgPool,
    id: i64,
    trace_id: Uuid,
    step_status: &str,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE report_runs \
         SET status = 'running', started_at = NOW(), trace_id = $1, step_status = $2, \
             updated_at = NOW() \
         WHERE id = $3 AND status = 'pending'",
    )
    .bind(trace_id)
    .bind(step_status)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "pending",
        });
    }

    Ok(())
}

/// Updates the human-readable phase of a `running` run.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not `running`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn set_step_status(pool: &PgPool, id: i64, step_status: &str) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE report_runs SET step_status = $1, updated_at = NOW() \
         WHERE id = $2 AND status = 'running'",
    )
    .bind(step_status)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Marks a `running` run `completed` with its final totals and counters.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not `running`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn complete_report_run(
    pool: &PgPool,
    id: i64,
    usd_cost: Decimal,
    tokens_used: i64,
    counters: &RunCounters,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE report_runs \
         SET status = 'completed', step_status = 'Completed', completed_at = NOW(), \
             updated_at = NOW(), usd_cost = $1, tokens_used = $2, \
             failed_answers = $3, failed_questions = $4, failed_detections = $5, \
             tagging_failures = $6, unpriced_invocations = $7 \
         WHERE id = $8 AND status = 'running'",
    )
    .bind(usd_cost)
    .bind(tokens_used)
    .bind(counters.failed_answers)
    .bind(counters.failed_questions)
    .bind(counters.failed_detections)
    .bind(counters.tagging_failures)
    .bind(counters.unpriced_invocations)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Marks a non-terminal run `failed` with `error_message`.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is already terminal,
/// or [`DbError::Sqlx`] if the update fails.
pub async fn fail_report_run(pool: &PgPool, id: i64, error_message: &str) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE report_runs \
         SET status = 'failed', step_status = 'Failed', completed_at = NOW(), \
             updated_at = NOW(), error_message = $1 \
         WHERE id = $2 AND status IN ('pending', 'running')",
    )
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "pending or running",
        });
    }

    Ok(())
}

/// Returns a `running` run to `pending`, discarding everything it produced.
///
/// Used when a job is redelivered after a worker died mid-run. Answers
/// (with their mentions and citations) and cost records are deleted and all
/// totals zeroed in one transaction, so re-execution never double counts.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not `running`, or
/// [`DbError::Sqlx`] if any statement fails.
pub async fn reset_running_run(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE report_runs \
         SET status = 'pending', step_status = NULL, trace_id = NULL, started_at = NULL, \
             tokens_used = 0, usd_cost = 0, failed_answers = 0, failed_questions = 0, \
             failed_detections = 0, tagging_failures = 0, unpriced_invocations = 0, \
             error_message = NULL, updated_at = NOW() \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        });
    }

    sqlx::query("DELETE FROM cost_records WHERE run_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM answers WHERE run_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}
