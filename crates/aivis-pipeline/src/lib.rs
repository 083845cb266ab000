//! Report generation pipeline: the run orchestrator, its persistence port,
//! and the job-queue worker that feeds it.

pub mod error;
pub mod orchestrator;
pub mod store;
pub mod worker;

pub use error::PipelineError;
pub use orchestrator::{
    Orchestrator, RunOutcome, RunSettings, RunSummary, NO_ACTIVE_QUESTIONS, STEP_COSTING,
    STEP_DETECTING, STEP_ENRICHING, STEP_GENERATING, STEP_LOADING,
};
pub use store::{CompanyRecord, PgRunStore, QuestionRecord, RunRecord, RunStore};
pub use worker::{
    default_worker_id, process_job, run_once, run_worker, JobDisposition, WorkerConfig,
};
