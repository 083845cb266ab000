//! Postgres persistence for the report pipeline.
//!
//! Free functions over a `PgPool`, one module per table. Status columns are
//! stored as text and parsed back into the `aivis-core` enums on demand.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("record not found")]
    NotFound,
    #[error("report run {id} is not in expected status '{expected_status}'")]
    InvalidRunTransition {
        id: i64,
        expected_status: &'static str,
    },
    #[error("report job {id} is not in expected status '{expected_status}'")]
    InvalidJobTransition {
        id: i64,
        expected_status: &'static str,
    },
    #[error("corrupt row: {0}")]
    Corrupt(#[from] aivis_core::ParseEnumError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub mod answers;
pub mod citations;
pub mod companies;
pub mod competitors;
pub mod cost_records;
pub mod jobs;
pub mod mentions;
mod pool;
pub mod questions;
pub mod report_runs;

pub use answers::{insert_answer, list_answers_for_run, set_tagged_text, AnswerRow, NewAnswer};
pub use citations::{insert_citations, list_citations_for_answer, CitationRow, NewCitation};
pub use companies::{create_company, get_company, get_company_by_public_id, CompanyRow};
pub use competitors::{
    insert_competitor_if_absent, insert_generated_competitors, list_competitors, CompetitorRow,
};
pub use cost_records::{
    insert_cost_record, list_cost_records_for_run, sum_run_costs, CostRecordRow, NewCostRecord,
    RunCostTotals,
};
pub use jobs::{
    claim_next_job, complete_job, enqueue_report_job, get_job_for_run, reclaim_stale_jobs,
    release_job_for_retry, requeue_dead_job, retry_delay, ReportJobRow,
};
pub use mentions::{insert_mentions, list_mentions_for_answer, MentionRow, NewMention};
pub use pool::{connect_pool, health_check, run_migrations, PoolConfig};
pub use questions::{create_question, list_active_questions, QuestionRow};
pub use report_runs::{
    complete_report_run, create_report_run, fail_report_run, get_report_run,
    get_report_run_by_public_id, list_report_runs, reset_running_run, set_step_status,
    start_report_run, ReportRunRow, RunCounters,
};
