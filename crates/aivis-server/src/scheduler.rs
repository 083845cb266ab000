//! Background job scheduler.
//!
//! Registers the stale-job reclaim sweep: jobs whose lock is older than
//! `AIVIS_JOB_LOCK_TIMEOUT_SECS` go back to the queue (or are buried once
//! their attempts are spent).

use std::sync::Arc;

use aivis_core::AppConfig;
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

const RECLAIM_SCHEDULE: &str = "0 * * * * *";

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive for
/// the lifetime of the process. Dropping it shuts down all scheduled jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(
    pool: PgPool,
    config: Arc<AppConfig>,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    register_reclaim_job(&scheduler, pool, config.job_lock_timeout_secs).await?;
    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_reclaim_job(
    scheduler: &JobScheduler,
    pool: PgPool,
    lock_timeout_secs: u64,
) -> Result<(), JobSchedulerError> {
    let pool = Arc::new(pool);

    let job = Job::new_async(RECLAIM_SCHEDULE, move |_uuid, _lock| {
        let pool = Arc::clone(&pool);

        Box::pin(async move {
            match aivis_db::reclaim_stale_jobs(&pool, lock_timeout_secs).await {
                Ok(0) => tracing::debug!("scheduler: no stale jobs"),
                Ok(reclaimed) => {
                    tracing::warn!(reclaimed, "scheduler: returned stale jobs to the queue");
                }
                Err(e) => tracing::error!(error = %e, "scheduler: stale-job reclaim failed"),
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}
