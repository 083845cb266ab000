//! Report run command handlers for the CLI.
//!
//! `execute` drives a run in-process without the queue; `worker` runs the
//! same queue loop the server embeds.

use std::sync::Arc;

use aivis_core::AppConfig;
use aivis_pipeline::{
    JobDisposition, Orchestrator, PgRunStore, RunOutcome, RunSettings, RunStore, WorkerConfig,
};
use clap::Subcommand;
use uuid::Uuid;

use crate::catalog::load_company;

#[derive(Debug, Subcommand)]
pub enum RunCommands {
    /// Create a pending run for a company and queue it
    Create {
        /// Company public id
        #[arg(long)]
        company: Uuid,
        /// Create the run without queueing it
        #[arg(long)]
        no_enqueue: bool,
    },
    /// Queue an existing run (idempotent; revives a dead job)
    Enqueue {
        /// Run public id
        run: Uuid,
    },
    /// Execute a run in this process, bypassing the queue
    Execute {
        /// Run public id
        run: Uuid,
    },
    /// Show a run's status, totals, and failure counts
    Status {
        /// Run public id
        run: Uuid,
    },
    /// List a company's most recent runs
    List {
        /// Company public id
        #[arg(long)]
        company: Uuid,
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

/// Build an orchestrator wired to Postgres and the configured backends.
fn build_orchestrator(pool: &sqlx::PgPool, config: &AppConfig) -> anyhow::Result<Orchestrator> {
    let pricing = Arc::new(aivis_core::load_pricing_or_default(&config.pricing_path)?);
    let backends = aivis_backend::build_backends(config, Arc::clone(&pricing))
        .map_err(|e| anyhow::anyhow!("failed to build backends: {e}"))?;
    let store: Arc<dyn RunStore> = Arc::new(PgRunStore::new(pool.clone()));
    Ok(Orchestrator::new(
        store,
        backends,
        pricing,
        RunSettings::from_app_config(config),
    ))
}

async fn load_run(pool: &sqlx::PgPool, public_id: Uuid) -> anyhow::Result<aivis_db::ReportRunRow> {
    aivis_db::get_report_run_by_public_id(pool, public_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("run {public_id} not found"))
}

pub(crate) fn describe_outcome(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed(summary) => {
            let c = &summary.counters;
            format!(
                "completed: {} answers, {} mentions, {} citations, {} new competitors, \
                 ${} over {} tokens (failed answers {}, failed questions {}, \
                 failed detections {}, tagging failures {}, unpriced {})",
                summary.answers_succeeded,
                summary.mentions,
                summary.citations,
                summary.new_competitors.len(),
                summary.usd_cost,
                summary.tokens_used,
                c.failed_answers,
                c.failed_questions,
                c.failed_detections,
                c.tagging_failures,
                c.unpriced_invocations,
            )
        }
        RunOutcome::Failed { reason } => format!("failed: {reason}"),
        RunOutcome::AlreadyTerminal { status } => format!("already {status}; nothing to do"),
    }
}

fn print_run(run: &aivis_db::ReportRunRow, job: Option<&aivis_db::ReportJobRow>) {
    let fmt_ts = |ts: Option<chrono::DateTime<chrono::Utc>>| {
        ts.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
    };
    println!("run:        {}", run.public_id);
    println!("status:     {}", run.status);
    println!("step:       {}", run.step_status.as_deref().unwrap_or("-"));
    println!(
        "trace:      {}",
        run.trace_id.map_or_else(|| "-".to_string(), |t| t.to_string())
    );
    println!("cost:       ${}", run.usd_cost);
    println!("tokens:     {}", run.tokens_used);
    println!(
        "failures:   answers {}, questions {}, detections {}, tagging {}, unpriced {}",
        run.failed_answers,
        run.failed_questions,
        run.failed_detections,
        run.tagging_failures,
        run.unpriced_invocations
    );
    if let Some(error) = &run.error_message {
        println!("error:      {error}");
    }
    println!("started:    {}", fmt_ts(run.started_at));
    println!("completed:  {}", fmt_ts(run.completed_at));
    match job {
        Some(job) => println!(
            "job:        {} (attempt {}/{}){}",
            job.status,
            job.attempts,
            job.max_attempts,
            job.last_error
                .as_deref()
                .map(|e| format!(", last error: {e}"))
                .unwrap_or_default()
        ),
        None => println!("job:        not queued"),
    }
}

/// Dispatch a `run` subcommand.
///
/// # Errors
///
/// Returns an error if the company or run does not exist, the backends
/// cannot be built, or a database operation fails.
pub(crate) async fn run_run_command(
    pool: &sqlx::PgPool,
    config: &AppConfig,
    command: RunCommands,
) -> anyhow::Result<()> {
    match command {
        RunCommands::Create {
            company,
            no_enqueue,
        } => {
            let company = load_company(pool, company).await?;
            let run = aivis_db::create_report_run(pool, company.id).await?;
            if no_enqueue {
                println!("run {} created for {} (not queued)", run.public_id, company.name);
            } else {
                aivis_db::enqueue_report_job(pool, run.id, config.job_max_attempts).await?;
                println!("run {} created for {} and queued", run.public_id, company.name);
            }
        }
        RunCommands::Enqueue { run } => {
            let run = load_run(pool, run).await?;
            if run.run_status()?.is_terminal() {
                anyhow::bail!("run {} is already {}", run.public_id, run.status);
            }
            let queued = aivis_db::enqueue_report_job(pool, run.id, config.job_max_attempts).await?
                || aivis_db::requeue_dead_job(pool, run.id, config.job_max_attempts).await?;
            if queued {
                println!("run {} queued", run.public_id);
            } else {
                println!("run {} already has a live job", run.public_id);
            }
        }
        RunCommands::Execute { run } => {
            let run = load_run(pool, run).await?;
            let orchestrator = build_orchestrator(pool, config)?;
            let outcome = orchestrator.execute_run(run.id).await?;
            println!("run {} {}", run.public_id, describe_outcome(&outcome));
        }
        RunCommands::Status { run } => {
            let run = load_run(pool, run).await?;
            let job = aivis_db::get_job_for_run(pool, run.id).await?;
            print_run(&run, job.as_ref());
        }
        RunCommands::List { company, limit } => {
            let company = load_company(pool, company).await?;
            let runs = aivis_db::list_report_runs(pool, company.id, limit.clamp(1, 100)).await?;
            if runs.is_empty() {
                println!("no runs for {}", company.name);
            }
            for run in &runs {
                println!(
                    "{}  {:<9}  ${:<12}  {}",
                    run.public_id,
                    run.status,
                    run.usd_cost,
                    run.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }
    Ok(())
}

/// Run the queue worker until ctrl-c, or process a single job with `once`.
///
/// # Errors
///
/// Returns an error if the backends cannot be built or, with `once`, if the
/// job cannot be claimed or settled.
pub(crate) async fn run_worker_command(
    pool: sqlx::PgPool,
    config: &AppConfig,
    once: bool,
) -> anyhow::Result<()> {
    let orchestrator = Arc::new(build_orchestrator(&pool, config)?);
    let worker_config =
        WorkerConfig::from_app_config(config, aivis_pipeline::default_worker_id("cli"));

    if once {
        match aivis_pipeline::run_once(&pool, &orchestrator, &worker_config).await? {
            None => println!("queue is empty"),
            Some(JobDisposition::Done(Some(outcome))) => println!("{}", describe_outcome(&outcome)),
            Some(JobDisposition::Done(None)) => println!("job referenced a missing run; discarded"),
            Some(JobDisposition::Released(status)) => println!("job released as {status}"),
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received ctrl-c, finishing in-flight runs");
                shutdown_tx.send_replace(true);
            }
            Err(e) => {
                // Dropping the sender would stop the worker; keep it alive.
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    });

    aivis_pipeline::run_worker(pool, orchestrator, worker_config, shutdown_rx).await;
    Ok(())
}
