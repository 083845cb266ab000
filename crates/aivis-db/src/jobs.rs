//! The `report_jobs` queue.
//!
//! One row per run. Workers claim with `FOR UPDATE SKIP LOCKED`, so a job is
//! held by at most one worker at a time. Failed jobs return to `queued` with
//! exponential back-off until `max_attempts`, then become `dead`.

use std::time::Duration;

use aivis_core::JobStatus;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

const JOB_COLUMNS: &str = "id, run_id, status, attempts, max_attempts, run_after, locked_at, \
     locked_by, last_error, created_at, updated_at";

/// Exponent cap so the delay never overflows.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// A row from the `report_jobs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReportJobRow {
    pub id: i64,
    pub run_id: i64,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_after: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportJobRow {
    /// Parsed `status` column.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Corrupt`] if the stored value is not a known status.
    pub fn job_status(&self) -> Result<JobStatus, DbError> {
        Ok(self.status.parse()?)
    }

    #[must_use]
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Delay before retrying a job that has failed `attempts` times:
/// `base × 2^(attempts-1)`.
#[must_use]
pub fn retry_delay(base_secs: u64, attempts: i32) -> Duration {
    let exponent = u32::try_from(attempts.saturating_sub(1))
        .unwrap_or(0)
        .min(MAX_BACKOFF_EXPONENT);
    Duration::from_secs(base_secs.saturating_mul(1_u64 << exponent))
}

/// Queues a run. Returns `false` when the run already has a job.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn enqueue_report_job(
    pool: &PgPool,
    run_id: i64,
    max_attempts: i32,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO report_jobs (run_id, status, max_attempts) \
         VALUES ($1, 'queued', $2) \
         ON CONFLICT (run_id) DO NOTHING",
    )
    .bind(run_id)
    .bind(max_attempts)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Claims the oldest due job for `worker_id`, incrementing its attempt count.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn claim_next_job(pool: &PgPool, worker_id: &str) -> Result<Option<ReportJobRow>, DbError> {
    let row = sqlx::query_as::<_, ReportJobRow>(&format!(
        "UPDATE report_jobs \
         SET status = 'running', attempts = attempts + 1, locked_at = NOW(), \
             locked_by = $1, updated_at = NOW() \
         WHERE id = ( \
             SELECT id FROM report_jobs \
             WHERE status = 'queued' AND run_after <= NOW() \
             ORDER BY run_after, id \
             FOR UPDATE SKIP LOCKED \
             LIMIT 1 \
         ) \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(worker_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Marks a claimed job `done`.
///
/// # Errors
///
/// Returns [`DbError::InvalidJobTransition`] if the job is not `running`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn complete_job(pool: &PgPool, job_id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE report_jobs \
         SET status = 'done', locked_at = NULL, locked_by = NULL, updated_at = NOW() \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidJobTransition {
            id: job_id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Releases a failed job: back to `queued` after [`retry_delay`], or `dead`
/// once its attempts are exhausted. Returns the resulting status.
///
/// # Errors
///
/// Returns [`DbError::InvalidJobTransition`] if the job is not `running`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn release_job_for_retry(
    pool: &PgPool,
    job: &ReportJobRow,
    error: &str,
    backoff_base_secs: u64,
) -> Result<JobStatus, DbError> {
    let next = if job.attempts_exhausted() {
        JobStatus::Dead
    } else {
        JobStatus::Queued
    };
    let delay = retry_delay(backoff_base_secs, job.attempts);

    #[allow(clippy::cast_precision_loss)]
    let delay_secs = delay.as_secs() as f64;

    let result = sqlx::query(
        "UPDATE report_jobs \
         SET status = $1, last_error = $2, locked_at = NULL, locked_by = NULL, \
             run_after = CASE WHEN $1 = 'queued' \
                              THEN NOW() + make_interval(secs => $3) \
                              ELSE run_after END, \
             updated_at = NOW() \
         WHERE id = $4 AND status = 'running'",
    )
    .bind(next.as_str())
    .bind(error)
    .bind(delay_secs)
    .bind(job.id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidJobTransition {
            id: job.id,
            expected_status: "running",
        });
    }

    Ok(next)
}

/// Returns jobs whose lock is older than `lock_timeout_secs` to the queue.
/// A job with no attempts left is buried instead, and its run is marked
/// `failed`. Returns the number of jobs touched.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn reclaim_stale_jobs(pool: &PgPool, lock_timeout_secs: u64) -> Result<u64, DbError> {
    #[allow(clippy::cast_precision_loss)]
    let timeout = lock_timeout_secs as f64;

    let reclaimed: i64 = sqlx::query_scalar(
        "WITH reclaimed AS ( \
             UPDATE report_jobs \
             SET status = CASE WHEN attempts >= max_attempts THEN 'dead' ELSE 'queued' END, \
                 locked_at = NULL, locked_by = NULL, run_after = NOW(), \
                 last_error = 'lock expired', updated_at = NOW() \
             WHERE status = 'running' AND locked_at < NOW() - make_interval(secs => $1) \
             RETURNING run_id, status \
         ), buried AS ( \
             UPDATE report_runs r \
             SET status = 'failed', step_status = 'Failed', completed_at = NOW(), \
                 updated_at = NOW(), error_message = 'job lock expired with no attempts left' \
             FROM reclaimed \
             WHERE r.id = reclaimed.run_id AND reclaimed.status = 'dead' \
               AND r.status IN ('pending', 'running') \
             RETURNING r.id \
         ) \
         SELECT COUNT(*) FROM reclaimed",
    )
    .bind(timeout)
    .fetch_one(pool)
    .await?;

    Ok(u64::try_from(reclaimed).unwrap_or(0))
}

/// Puts a `dead` job back in the queue with a fresh attempt budget.
/// Returns `false` when the run has no dead job.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn requeue_dead_job(
    pool: &PgPool,
    run_id: i64,
    max_attempts: i32,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE report_jobs \
         SET status = 'queued', attempts = 0, max_attempts = $1, run_after = NOW(), \
             locked_at = NULL, locked_by = NULL, updated_at = NOW() \
         WHERE run_id = $2 AND status = 'dead'",
    )
    .bind(max_attempts)
    .bind(run_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Fetches the job for a run, or `None` if the run was never enqueued.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_job_for_run(pool: &PgPool, run_id: i64) -> Result<Option<ReportJobRow>, DbError> {
    let row = sqlx::query_as::<_, ReportJobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM report_jobs WHERE run_id = $1"
    ))
    .bind(run_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
