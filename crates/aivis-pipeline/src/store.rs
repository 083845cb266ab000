//! Persistence port used by the orchestrator.
//!
//! [`RunStore`] is the only way a run reads or writes state. [`PgRunStore`]
//! maps it onto `aivis-db`; tests substitute an in-memory implementation.

use aivis_core::RunStatus;
use aivis_db::{
    DbError, NewAnswer, NewCitation, NewCostRecord, NewMention, RunCostTotals, RunCounters,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: i64,
    pub company_id: i64,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyRecord {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRecord {
    pub id: i64,
    pub text: String,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn load_run(&self, run_id: i64) -> Result<Option<RunRecord>, DbError>;

    /// Return a `running` run to `pending`, deleting its answers and costs.
    async fn reset_running_run(&self, run_id: i64) -> Result<(), DbError>;

    async fn start_run(&self, run_id: i64, trace_id: Uuid, step_status: &str)
        -> Result<(), DbError>;

    async fn set_step(&self, run_id: i64, step_status: &str) -> Result<(), DbError>;

    async fn load_company(&self, company_id: i64) -> Result<Option<CompanyRecord>, DbError>;

    async fn list_active_questions(&self, company_id: i64)
        -> Result<Vec<QuestionRecord>, DbError>;

    async fn list_competitor_names(&self, company_id: i64) -> Result<Vec<String>, DbError>;

    async fn insert_answer(&self, answer: &NewAnswer<'_>) -> Result<i64, DbError>;

    async fn set_tagged_text(&self, answer_id: i64, tagged_text: &str) -> Result<(), DbError>;

    async fn insert_mentions(
        &self,
        answer_id: i64,
        mentions: &[NewMention<'_>],
    ) -> Result<(), DbError>;

    async fn insert_citations(
        &self,
        answer_id: i64,
        citations: &[NewCitation<'_>],
    ) -> Result<u64, DbError>;

    async fn insert_cost_record(&self, record: &NewCostRecord<'_>) -> Result<i64, DbError>;

    /// Insert generated competitors, returning the names actually created.
    async fn insert_generated_competitors(
        &self,
        company_id: i64,
        names: &[String],
    ) -> Result<Vec<String>, DbError>;

    async fn sum_run_costs(&self, run_id: i64) -> Result<RunCostTotals, DbError>;

    async fn complete_run(
        &self,
        run_id: i64,
        usd_cost: Decimal,
        tokens_used: i64,
        counters: &RunCounters,
    ) -> Result<(), DbError>;

    async fn fail_run(&self, run_id: i64, error_message: &str) -> Result<(), DbError>;
}

/// [`RunStore`] over a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn load_run(&self, run_id: i64) -> Result<Option<RunRecord>, DbError> {
        let Some(row) = aivis_db::get_report_run(&self.pool, run_id).await? else {
            return Ok(None);
        };
        Ok(Some(RunRecord {
            id: row.id,
            company_id: row.company_id,
            status: row.run_status()?,
        }))
    }

    async fn reset_running_run(&self, run_id: i64) -> Result<(), DbError> {
        aivis_db::reset_running_run(&self.pool, run_id).await
    }

    async fn start_run(
        &self,
        run_id: i64,
        trace_id: Uuid,
        step_status: &str,
    ) -> Result<(), DbError> {
        aivis_db::start_report_run(&self.pool, run_id, trace_id, step_status).await
    }

    async fn set_step(&self, run_id: i64, step_status: &str) -> Result<(), DbError> {
        aivis_db::set_step_status(&self.pool, run_id, step_status).await
    }

    async fn load_company(&self, company_id: i64) -> Result<Option<CompanyRecord>, DbError> {
        Ok(aivis_db::get_company(&self.pool, company_id)
            .await?
            .map(|row| CompanyRecord {
                id: row.id,
                name: row.name,
            }))
    }

    async fn list_active_questions(
        &self,
        company_id: i64,
    ) -> Result<Vec<QuestionRecord>, DbError> {
        Ok(aivis_db::list_active_questions(&self.pool, company_id)
            .await?
            .into_iter()
            .map(|row| QuestionRecord {
                id: row.id,
                text: row.text,
            })
            .collect())
    }

    async fn list_competitor_names(&self, company_id: i64) -> Result<Vec<String>, DbError> {
        Ok(aivis_db::list_competitors(&self.pool, company_id)
            .await?
            .into_iter()
            .map(|row| row.name)
            .collect())
    }

    async fn insert_answer(&self, answer: &NewAnswer<'_>) -> Result<i64, DbError> {
        aivis_db::insert_answer(&self.pool, answer).await
    }

    async fn set_tagged_text(&self, answer_id: i64, tagged_text: &str) -> Result<(), DbError> {
        aivis_db::set_tagged_text(&self.pool, answer_id, tagged_text).await
    }

    async fn insert_mentions(
        &self,
        answer_id: i64,
        mentions: &[NewMention<'_>],
    ) -> Result<(), DbError> {
        aivis_db::insert_mentions(&self.pool, answer_id, mentions).await
    }

    async fn insert_citations(
        &self,
        answer_id: i64,
        citations: &[NewCitation<'_>],
    ) -> Result<u64, DbError> {
        aivis_db::insert_citations(&self.pool, answer_id, citations).await
    }

    async fn insert_cost_record(&self, record: &NewCostRecord<'_>) -> Result<i64, DbError> {
        aivis_db::insert_cost_record(&self.pool, record).await
    }

    async fn insert_generated_competitors(
        &self,
        company_id: i64,
        names: &[String],
    ) -> Result<Vec<String>, DbError> {
        Ok(
            aivis_db::insert_generated_competitors(&self.pool, company_id, names)
                .await?
                .into_iter()
                .map(|row| row.name)
                .collect(),
        )
    }

    async fn sum_run_costs(&self, run_id: i64) -> Result<RunCostTotals, DbError> {
        aivis_db::sum_run_costs(&self.pool, run_id).await
    }

    async fn complete_run(
        &self,
        run_id: i64,
        usd_cost: Decimal,
        tokens_used: i64,
        counters: &RunCounters,
    ) -> Result<(), DbError> {
        aivis_db::complete_report_run(&self.pool, run_id, usd_cost, tokens_used, counters).await
    }

    async fn fail_run(&self, run_id: i64, error_message: &str) -> Result<(), DbError> {
        aivis_db::fail_report_run(&self.pool, run_id, error_message).await
    }
}
