//! Job Queue Worker.
//!
//! Claims `report_jobs` rows with `FOR UPDATE SKIP LOCKED`, executes each
//! run on the orchestrator, and settles the job: terminal outcomes mark it
//! `done`, store failures send it back to the queue with back-off. A job
//! that runs out of attempts is buried and its run marked `failed`.

use std::sync::Arc;
use std::time::Duration;

use aivis_core::{AppConfig, JobStatus};
use aivis_db::ReportJobRow;
use sqlx::PgPool;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::error::PipelineError;
use crate::orchestrator::{Orchestrator, RunOutcome};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Written to `report_jobs.locked_by`.
    pub worker_id: String,
    pub max_concurrent_runs: usize,
    pub poll_interval: Duration,
    pub retry_backoff_base_secs: u64,
    pub lock_timeout_secs: u64,
}

impl WorkerConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig, worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            max_concurrent_runs: config.worker_max_concurrent_runs.max(1),
            poll_interval: Duration::from_millis(config.worker_poll_interval_ms),
            retry_backoff_base_secs: config.job_retry_backoff_base_secs,
            lock_timeout_secs: config.job_lock_timeout_secs,
        }
    }
}

/// A worker id unique enough to tell processes apart in `locked_by`.
#[must_use]
pub fn default_worker_id(prefix: &str) -> String {
    format!("{prefix}-{}-{}", std::process::id(), uuid::Uuid::new_v4().simple())
}

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobDisposition {
    /// The run reached a terminal state (or no longer exists); job is `done`.
    Done(Option<RunOutcome>),
    /// The run hit a store error; the job went back to the queue, or died
    /// and took the run with it.
    Released(JobStatus),
}

/// Execute the run behind `job` and settle the job row.
///
/// # Errors
///
/// Returns [`PipelineError::Store`] only if settling the job row itself
/// fails; run failures are folded into the returned disposition.
pub async fn process_job(
    pool: &PgPool,
    orchestrator: &Orchestrator,
    job: &ReportJobRow,
    retry_backoff_base_secs: u64,
) -> Result<JobDisposition, PipelineError> {
    match orchestrator.execute_run(job.run_id).await {
        Ok(outcome) => {
            aivis_db::complete_job(pool, job.id).await?;
            Ok(JobDisposition::Done(Some(outcome)))
        }
        Err(PipelineError::RunNotFound(run_id)) => {
            tracing::warn!(job_id = job.id, run_id, "job references a missing run, discarding");
            aivis_db::complete_job(pool, job.id).await?;
            Ok(JobDisposition::Done(None))
        }
        Err(err) => {
            let status =
                aivis_db::release_job_for_retry(pool, job, &err.to_string(), retry_backoff_base_secs)
                    .await?;
            if status == JobStatus::Dead {
                tracing::error!(
                    job_id = job.id,
                    run_id = job.run_id,
                    attempts = job.attempts,
                    error = %err,
                    "job exhausted its attempts and is dead"
                );
                let reason = format!("gave up after {} attempts: {err}", job.attempts);
                if let Err(e) = orchestrator.abandon_run(job.run_id, &reason).await {
                    tracing::error!(run_id = job.run_id, error = %e, "failed to mark abandoned run as failed");
                }
            } else {
                tracing::warn!(
                    job_id = job.id,
                    run_id = job.run_id,
                    attempts = job.attempts,
                    max_attempts = job.max_attempts,
                    error = %err,
                    "job failed, re-queued with back-off"
                );
            }
            Ok(JobDisposition::Released(status))
        }
    }
}

/// Claim and process at most one job. Returns `None` when the queue is empty.
///
/// # Errors
///
/// Returns [`PipelineError::Store`] if claiming or settling the job fails.
pub async fn run_once(
    pool: &PgPool,
    orchestrator: &Orchestrator,
    config: &WorkerConfig,
) -> Result<Option<JobDisposition>, PipelineError> {
    let Some(job) = aivis_db::claim_next_job(pool, &config.worker_id).await? else {
        return Ok(None);
    };
    tracing::info!(job_id = job.id, run_id = job.run_id, attempt = job.attempts, "job claimed");
    process_job(pool, orchestrator, &job, config.retry_backoff_base_secs)
        .await
        .map(Some)
}

async fn reclaim_at_start(pool: &PgPool, lock_timeout_secs: u64) {
    match aivis_db::reclaim_stale_jobs(pool, lock_timeout_secs).await {
        Ok(0) => {}
        Ok(n) => tracing::warn!(reclaimed = n, "returned stale jobs to the queue"),
        Err(e) => tracing::error!(error = %e, "failed to reclaim stale jobs"),
    }
}

/// Poll the queue until `shutdown` flips to `true`, running up to
/// `max_concurrent_runs` jobs at once. In-flight runs are awaited before
/// returning.
pub async fn run_worker(
    pool: PgPool,
    orchestrator: Arc<Orchestrator>,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    reclaim_at_start(&pool, config.lock_timeout_secs).await;

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_runs));
    let mut in_flight = JoinSet::new();

    tracing::info!(
        worker_id = %config.worker_id,
        max_concurrent_runs = config.max_concurrent_runs,
        "worker started"
    );

    loop {
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                tracing::error!(error = %e, "job task panicked");
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.changed() => break,
        };

        match aivis_db::claim_next_job(&pool, &config.worker_id).await {
            Ok(Some(job)) => {
                tracing::info!(job_id = job.id, run_id = job.run_id, attempt = job.attempts, "job claimed");
                let pool = pool.clone();
                let orchestrator = Arc::clone(&orchestrator);
                let backoff = config.retry_backoff_base_secs;
                in_flight.spawn(async move {
                    if let Err(e) = process_job(&pool, &orchestrator, &job, backoff).await {
                        tracing::error!(job_id = job.id, error = %e, "failed to settle job");
                    }
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    () = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "failed to claim job");
                tokio::select! {
                    () = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    tracing::info!(in_flight = in_flight.len(), "worker stopping, waiting for in-flight runs");
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "job task panicked");
        }
    }
    tracing::info!("worker stopped");
}
