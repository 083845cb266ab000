//! Run submission and status polling.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{
    map_db_error, normalize_limit, ApiError, ApiResponse, AppState, ErrorCode, ResponseMeta,
};

#[derive(Debug, Deserialize)]
pub(super) struct CreateRunRequest {
    pub company_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub(super) struct RunsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct RunFailures {
    failed_answers: i32,
    failed_questions: i32,
    failed_detections: i32,
    tagging_failures: i32,
    unpriced_invocations: i32,
}

#[derive(Debug, Serialize)]
pub(super) struct JobItem {
    status: String,
    attempts: i32,
    max_attempts: i32,
    run_after: DateTime<Utc>,
    last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct RunItem {
    run_id: Uuid,
    company_id: Uuid,
    status: String,
    step_status: Option<String>,
    trace_id: Option<Uuid>,
    tokens_used: i64,
    usd_cost: Decimal,
    failures: RunFailures,
    error_message: Option<String>,
    job: Option<JobItem>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub(super) struct EnqueueResult {
    run_id: Uuid,
    enqueued: bool,
    job: Option<JobItem>,
}

#[derive(Debug, Serialize)]
pub(super) struct MentionItem {
    name: String,
    kind: String,
    confidence: f64,
    char_offset: i64,
    tag_status: String,
    tag_detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct CitationItem {
    url: String,
    normalized_url: String,
    domain: String,
    title: String,
    source_kind: String,
}

#[derive(Debug, Serialize)]
pub(super) struct AnswerItem {
    answer_id: i64,
    question_id: i64,
    model_id: String,
    status: String,
    tagged_text: Option<String>,
    error_message: Option<String>,
    tokens_in: i64,
    tokens_out: i64,
    tokens_cached: i64,
    tokens_thinking: i64,
    search_count: i64,
    mentions: Vec<MentionItem>,
    citations: Vec<CitationItem>,
}

impl From<aivis_db::ReportJobRow> for JobItem {
    fn from(row: aivis_db::ReportJobRow) -> Self {
        Self {
            status: row.status,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            run_after: row.run_after,
            last_error: row.last_error,
        }
    }
}

fn run_item(
    row: aivis_db::ReportRunRow,
    company_public_id: Uuid,
    job: Option<aivis_db::ReportJobRow>,
) -> RunItem {
    let counters = row.counters();
    RunItem {
        run_id: row.public_id,
        company_id: company_public_id,
        status: row.status,
        step_status: row.step_status,
        trace_id: row.trace_id,
        tokens_used: row.tokens_used,
        usd_cost: row.usd_cost,
        failures: RunFailures {
            failed_answers: counters.failed_answers,
            failed_questions: counters.failed_questions,
            failed_detections: counters.failed_detections,
            tagging_failures: counters.tagging_failures,
            unpriced_invocations: counters.unpriced_invocations,
        },
        error_message: row.error_message,
        job: job.map(JobItem::from),
        created_at: row.created_at,
        started_at: row.started_at,
        completed_at: row.completed_at,
    }
}

fn parse_public_id(req_id: &str, what: &str, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| {
        ApiError::new(
            req_id,
            ErrorCode::ValidationError,
            format!("{what} must be a UUID, got '{raw}'"),
        )
    })
}

async fn resolve_run(
    state: &AppState,
    req_id: &str,
    raw: &str,
) -> Result<aivis_db::ReportRunRow, ApiError> {
    let public_id = parse_public_id(req_id, "run_id", raw)?;
    aivis_db::get_report_run_by_public_id(&state.pool, public_id)
        .await
        .map_err(|e| map_db_error(req_id.to_owned(), &e))?
        .ok_or_else(|| ApiError::new(req_id, ErrorCode::NotFound, format!("run {public_id} not found")))
}

async fn company_public_id(
    state: &AppState,
    req_id: &str,
    company_id: i64,
) -> Result<Uuid, ApiError> {
    aivis_db::get_company(&state.pool, company_id)
        .await
        .map_err(|e| map_db_error(req_id.to_owned(), &e))?
        .map(|company| company.public_id)
        .ok_or_else(|| ApiError::new(req_id, ErrorCode::NotFound, "company not found"))
}

/// POST /api/v1/runs: create a pending run for a company and queue it.
pub(super) async fn create_run(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RunItem>>), ApiError> {
    let rid = &req_id.0;

    let company = aivis_db::get_company_by_public_id(&state.pool, body.company_id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?
        .ok_or_else(|| {
            ApiError::new(
                rid,
                ErrorCode::NotFound,
                format!("company {} not found", body.company_id),
            )
        })?;

    let run = aivis_db::create_report_run(&state.pool, company.id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    aivis_db::enqueue_report_job(&state.pool, run.id, state.config.job_max_attempts)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    let job = aivis_db::get_job_for_run(&state.pool, run.id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::info!(run_id = run.id, company_id = company.id, "run created and queued");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            data: run_item(run, company.public_id, job),
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

/// POST /api/v1/runs/{run_id}/enqueue: queue a run again.
///
/// A run that already has a live job is left alone; a dead job gets a fresh
/// attempt budget. Terminal runs are rejected.
pub(super) async fn enqueue_run(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(run_id): Path<String>,
) -> Result<Json<ApiResponse<EnqueueResult>>, ApiError> {
    let rid = &req_id.0;
    let run = resolve_run(&state, rid, &run_id).await?;

    let status = run.run_status().map_err(|e| map_db_error(rid.clone(), &e))?;
    if status.is_terminal() {
        return Err(ApiError::new(
            rid,
            ErrorCode::Conflict,
            format!("run {} is already {status}", run.public_id),
        ));
    }

    let max_attempts = state.config.job_max_attempts;
    let mut enqueued = aivis_db::enqueue_report_job(&state.pool, run.id, max_attempts)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    if !enqueued {
        enqueued = aivis_db::requeue_dead_job(&state.pool, run.id, max_attempts)
            .await
            .map_err(|e| map_db_error(rid.clone(), &e))?;
    }
    let job = aivis_db::get_job_for_run(&state.pool, run.id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::info!(run_id = run.id, enqueued, "enqueue requested");

    Ok(Json(ApiResponse {
        data: EnqueueResult {
            run_id: run.public_id,
            enqueued,
            job: job.map(JobItem::from),
        },
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// GET /api/v1/runs/{run_id}
pub(super) async fn get_run(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(run_id): Path<String>,
) -> Result<Json<ApiResponse<RunItem>>, ApiError> {
    let rid = &req_id.0;
    let run = resolve_run(&state, rid, &run_id).await?;
    let company = company_public_id(&state, rid, run.company_id).await?;
    let job = aivis_db::get_job_for_run(&state.pool, run.id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: run_item(run, company, job),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// GET /api/v1/runs/{run_id}/answers
pub(super) async fn list_run_answers(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(run_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<AnswerItem>>>, ApiError> {
    let rid = &req_id.0;
    let run = resolve_run(&state, rid, &run_id).await?;

    let answers = aivis_db::list_answers_for_run(&state.pool, run.id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    let mut data = Vec::with_capacity(answers.len());
    for answer in answers {
        let mentions = aivis_db::list_mentions_for_answer(&state.pool, answer.id)
            .await
            .map_err(|e| map_db_error(rid.clone(), &e))?;
        let citations = aivis_db::list_citations_for_answer(&state.pool, answer.id)
            .await
            .map_err(|e| map_db_error(rid.clone(), &e))?;

        data.push(AnswerItem {
            answer_id: answer.id,
            question_id: answer.question_id,
            model_id: answer.model_id,
            status: answer.status,
            tagged_text: answer.tagged_text,
            error_message: answer.error_message,
            tokens_in: answer.tokens_in,
            tokens_out: answer.tokens_out,
            tokens_cached: answer.tokens_cached,
            tokens_thinking: answer.tokens_thinking,
            search_count: answer.search_count,
            mentions: mentions
                .into_iter()
                .map(|m| MentionItem {
                    name: m.name,
                    kind: m.kind,
                    confidence: m.confidence,
                    char_offset: m.char_offset,
                    tag_status: m.tag_status,
                    tag_detail: m.tag_detail,
                })
                .collect(),
            citations: citations
                .into_iter()
                .map(|c| CitationItem {
                    url: c.url,
                    normalized_url: c.normalized_url,
                    domain: c.domain,
                    title: c.title,
                    source_kind: c.source_kind,
                })
                .collect(),
        });
    }

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// GET /api/v1/companies/{company_id}/runs: newest first.
pub(super) async fn list_company_runs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(company_id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<ApiResponse<Vec<RunItem>>>, ApiError> {
    let rid = &req_id.0;
    let public_id = parse_public_id(rid, "company_id", &company_id)?;
    let company = aivis_db::get_company_by_public_id(&state.pool, public_id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?
        .ok_or_else(|| ApiError::new(rid, ErrorCode::NotFound, format!("company {public_id} not found")))?;

    let rows = aivis_db::list_report_runs(&state.pool, company.id, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    let data = rows
        .into_iter()
        .map(|row| run_item(row, company.public_id, None))
        .collect();

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}
