use aivis_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("report run {0} not found")]
    RunNotFound(i64),

    /// Persistence failed mid-run. The job is worth retrying.
    #[error("store error: {0}")]
    Store(#[from] DbError),
}
