//! Live integration tests for aivis-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/aivis-db/`), so `"../../migrations"` resolves to the workspace
//! migration directory.

use std::str::FromStr;

use aivis_core::{AnswerStatus, CitationSource, InvocationKind, MentionKind, TagStatus, TokenUsage};
use aivis_db::{
    claim_next_job, complete_job, complete_report_run, create_company, create_question,
    create_report_run, enqueue_report_job, fail_report_run, get_job_for_run, get_report_run,
    insert_answer, insert_citations, insert_competitor_if_absent, insert_cost_record,
    insert_generated_competitors, insert_mentions, list_active_questions, list_answers_for_run,
    list_citations_for_answer, list_competitors, list_mentions_for_answer, reclaim_stale_jobs,
    release_job_for_retry, requeue_dead_job, reset_running_run, set_step_status, set_tagged_text,
    start_report_run, sum_run_costs, DbError, NewAnswer, NewCitation, NewCostRecord, NewMention,
    RunCounters,
};
use rust_decimal::Decimal;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

async fn seed_company(pool: &sqlx::PgPool) -> i64 {
    create_company(pool, "Acme", Some("https://acme.example"))
        .await
        .expect("create_company failed")
        .id
}

async fn seed_running_run(pool: &sqlx::PgPool) -> (i64, i64, i64) {
    let company_id = seed_company(pool).await;
    let question = create_question(pool, company_id, "Best widget vendor?", true)
        .await
        .expect("create_question failed");
    let run = create_report_run(pool, company_id)
        .await
        .expect("create_report_run failed");
    start_report_run(pool, run.id, Uuid::new_v4(), "Loading questions")
        .await
        .expect("start_report_run failed");
    (company_id, question.id, run.id)
}

fn succeeded_answer<'a>(run_id: i64, question_id: i64, text: &'a str) -> NewAnswer<'a> {
    NewAnswer {
        run_id,
        question_id,
        model_id: "demo-mini",
        status: AnswerStatus::Succeeded,
        raw_text: Some(text),
        error_message: None,
        usage: TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
            ..TokenUsage::default()
        },
        web_search_enabled: false,
    }
}

fn cost_record(run_id: i64, answer_id: Option<i64>, total: &str) -> NewCostRecord<'static> {
    NewCostRecord {
        run_id,
        answer_id,
        invocation: InvocationKind::Generation,
        model_id: "demo-mini",
        usage: TokenUsage {
            input_tokens: 100_000,
            output_tokens: 50_000,
            ..TokenUsage::default()
        },
        input_cost: dec("0.015"),
        output_cost: dec("0.030"),
        thinking_cost: Decimal::ZERO,
        caching_cost: Decimal::ZERO,
        search_cost: Decimal::ZERO,
        total_cost: dec(total),
    }
}

// ---------------------------------------------------------------------------
// Section 1: Run lifecycle
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn report_run_lifecycle_pending_to_completed(pool: sqlx::PgPool) {
    let company_id = seed_company(&pool).await;
    let run = create_report_run(&pool, company_id).await.unwrap();
    assert_eq!(run.status, "pending");
    assert_eq!(run.usd_cost, Decimal::ZERO);

    let trace_id = Uuid::new_v4();
    start_report_run(&pool, run.id, trace_id, "Loading questions")
        .await
        .unwrap();
    set_step_status(&pool, run.id, "Generating answers")
        .await
        .unwrap();

    let counters = RunCounters {
        failed_answers: 1,
        failed_questions: 0,
        failed_detections: 1,
        tagging_failures: 2,
        unpriced_invocations: 0,
    };
    complete_report_run(&pool, run.id, dec("0.045"), 150_000, &counters)
        .await
        .unwrap();

    let row = get_report_run(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(row.status, "completed");
    assert_eq!(row.step_status.as_deref(), Some("Completed"));
    assert_eq!(row.trace_id, Some(trace_id));
    assert_eq!(row.usd_cost, dec("0.045"));
    assert_eq!(row.tokens_used, 150_000);
    assert_eq!(row.counters(), counters);
    assert!(row.started_at.is_some());
    assert!(row.completed_at.is_some());
}

#[sqlx::test(migrations = "../../migrations")]
async fn start_twice_is_an_invalid_transition(pool: sqlx::PgPool) {
    let (_, _, run_id) = seed_running_run(&pool).await;
    let err = start_report_run(&pool, run_id, Uuid::new_v4(), "Loading questions")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::InvalidRunTransition {
            expected_status: "pending",
            ..
        }
    ));
}

#[sqlx::test(migrations = "../../migrations")]
async fn terminal_run_cannot_fail_again(pool: sqlx::PgPool) {
    let (_, _, run_id) = seed_running_run(&pool).await;
    fail_report_run(&pool, run_id, "no active questions")
        .await
        .unwrap();
    let row = get_report_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.error_message.as_deref(), Some("no active questions"));

    let err = fail_report_run(&pool, run_id, "again").await.unwrap_err();
    assert!(matches!(err, DbError::InvalidRunTransition { .. }));
}

#[sqlx::test(migrations = "../../migrations")]
async fn reset_running_run_discards_partial_output(pool: sqlx::PgPool) {
    let (_, question_id, run_id) = seed_running_run(&pool).await;
    let answer_id = insert_answer(&pool, &succeeded_answer(run_id, question_id, "Globex wins."))
        .await
        .unwrap();
    insert_cost_record(&pool, &cost_record(run_id, Some(answer_id), "0.045"))
        .await
        .unwrap();

    reset_running_run(&pool, run_id).await.unwrap();

    let row = get_report_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(row.status, "pending");
    assert!(row.trace_id.is_none());
    assert!(list_answers_for_run(&pool, run_id).await.unwrap().is_empty());
    assert_eq!(sum_run_costs(&pool, run_id).await.unwrap().records, 0);

    // Pending runs are not reset.
    let err = reset_running_run(&pool, run_id).await.unwrap_err();
    assert!(matches!(err, DbError::InvalidRunTransition { .. }));
}

// ---------------------------------------------------------------------------
// Section 2: Questions, answers, mentions, citations
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn inactive_questions_are_not_listed(pool: sqlx::PgPool) {
    let company_id = seed_company(&pool).await;
    create_question(&pool, company_id, "active one", true)
        .await
        .unwrap();
    create_question(&pool, company_id, "retired", false)
        .await
        .unwrap();

    let active = list_active_questions(&pool, company_id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].text, "active one");
}

#[sqlx::test(migrations = "../../migrations")]
async fn succeeded_answer_requires_text(pool: sqlx::PgPool) {
    let (_, question_id, run_id) = seed_running_run(&pool).await;
    let mut answer = succeeded_answer(run_id, question_id, "");
    let err = insert_answer(&pool, &answer).await.unwrap_err();
    assert!(matches!(err, DbError::Sqlx(_)));

    answer.raw_text = None;
    assert!(insert_answer(&pool, &answer).await.is_err());
}

#[sqlx::test(migrations = "../../migrations")]
async fn one_answer_per_question_and_model(pool: sqlx::PgPool) {
    let (_, question_id, run_id) = seed_running_run(&pool).await;
    insert_answer(&pool, &succeeded_answer(run_id, question_id, "first"))
        .await
        .unwrap();
    let dup = insert_answer(&pool, &succeeded_answer(run_id, question_id, "second")).await;
    assert!(dup.is_err());
}

#[sqlx::test(migrations = "../../migrations")]
async fn failed_answer_is_stored_without_text(pool: sqlx::PgPool) {
    let (_, question_id, run_id) = seed_running_run(&pool).await;
    let answer = NewAnswer {
        run_id,
        question_id,
        model_id: "demo-mini",
        status: AnswerStatus::Failed,
        raw_text: None,
        error_message: Some("backend timed out after 60s"),
        usage: TokenUsage::default(),
        web_search_enabled: true,
    };
    insert_answer(&pool, &answer).await.unwrap();

    let rows = list_answers_for_run(&pool, run_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].answer_status().unwrap(), AnswerStatus::Failed);
    assert!(rows[0].web_search_enabled);
}

#[sqlx::test(migrations = "../../migrations")]
async fn mentions_and_tagged_text_round_trip(pool: sqlx::PgPool) {
    let (_, question_id, run_id) = seed_running_run(&pool).await;
    let text = "Acme leads, followed by Globex and Initech.";
    let answer_id = insert_answer(&pool, &succeeded_answer(run_id, question_id, text))
        .await
        .unwrap();

    let mentions = [
        NewMention {
            name: "Initech",
            kind: MentionKind::Brand,
            confidence: 0.8,
            context_snippet: Some("and Initech."),
            char_offset: 35,
            tag_status: TagStatus::Tagged,
            tag_detail: None,
        },
        NewMention {
            name: "Globex",
            kind: MentionKind::Brand,
            confidence: 0.9,
            context_snippet: None,
            char_offset: 19,
            tag_status: TagStatus::Failed,
            tag_detail: Some("expected 'Globex' at offset, found 'd by G'".to_string()),
        },
    ];
    insert_mentions(&pool, answer_id, &mentions).await.unwrap();
    set_tagged_text(
        &pool,
        answer_id,
        "Acme leads, followed by Globex and <brand>Initech</brand>.",
    )
    .await
    .unwrap();

    let rows = list_mentions_for_answer(&pool, answer_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].name, "Globex");
    assert_eq!(rows[0].tag_status, "failed");
    assert_eq!(rows[1].tag_status, "tagged");

    let answers = list_answers_for_run(&pool, run_id).await.unwrap();
    assert!(answers[0]
        .tagged_text
        .as_deref()
        .unwrap()
        .contains("<brand>Initech</brand>"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn set_tagged_text_on_missing_answer_is_not_found(pool: sqlx::PgPool) {
    let err = set_tagged_text(&pool, 999_999, "x").await.unwrap_err();
    assert!(matches!(err, DbError::NotFound));
}

#[sqlx::test(migrations = "../../migrations")]
async fn citations_are_unique_per_normalized_url(pool: sqlx::PgPool) {
    let (_, question_id, run_id) = seed_running_run(&pool).await;
    let answer_id = insert_answer(&pool, &succeeded_answer(run_id, question_id, "see links"))
        .await
        .unwrap();

    let citation = NewCitation {
        url: "https://www.example.com/a/",
        normalized_url: "https://example.com/a",
        domain: "example.com",
        title: "Example",
        source_kind: CitationSource::Structured,
    };
    assert_eq!(
        insert_citations(&pool, answer_id, &[citation.clone()])
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        insert_citations(&pool, answer_id, &[citation]).await.unwrap(),
        0
    );

    let rows = list_citations_for_answer(&pool, answer_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source_kind, "structured");
}

// ---------------------------------------------------------------------------
// Section 3: Competitors
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn competitor_insert_is_case_insensitive_and_idempotent(pool: sqlx::PgPool) {
    let company_id = seed_company(&pool).await;

    let first = insert_competitor_if_absent(&pool, company_id, "Globex", None, false)
        .await
        .unwrap();
    assert!(first.is_some());
    let again = insert_competitor_if_absent(&pool, company_id, "GLOBEX", None, true)
        .await
        .unwrap();
    assert!(again.is_none());

    let names = vec!["globex".to_string(), "Initech".to_string()];
    let created = insert_generated_competitors(&pool, company_id, &names)
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, "Initech");
    assert!(created[0].is_generated);

    let second = insert_generated_competitors(&pool, company_id, &names)
        .await
        .unwrap();
    assert!(second.is_empty());
    assert_eq!(list_competitors(&pool, company_id).await.unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Section 4: Cost records
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn run_cost_totals_sum_every_record(pool: sqlx::PgPool) {
    let (_, question_id, run_id) = seed_running_run(&pool).await;
    let answer_id = insert_answer(&pool, &succeeded_answer(run_id, question_id, "text"))
        .await
        .unwrap();
    insert_cost_record(&pool, &cost_record(run_id, Some(answer_id), "0.045"))
        .await
        .unwrap();
    insert_cost_record(&pool, &cost_record(run_id, None, "0.00000075"))
        .await
        .unwrap();

    let totals = sum_run_costs(&pool, run_id).await.unwrap();
    assert_eq!(totals.usd_cost, dec("0.04500075"));
    assert_eq!(totals.tokens_used, 300_000);
    assert_eq!(totals.records, 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn empty_run_costs_are_zero(pool: sqlx::PgPool) {
    let (_, _, run_id) = seed_running_run(&pool).await;
    let totals = sum_run_costs(&pool, run_id).await.unwrap();
    assert_eq!(totals.usd_cost, Decimal::ZERO);
    assert_eq!(totals.tokens_used, 0);
}

// ---------------------------------------------------------------------------
// Section 5: Job queue
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn enqueue_is_idempotent_per_run(pool: sqlx::PgPool) {
    let company_id = seed_company(&pool).await;
    let run = create_report_run(&pool, company_id).await.unwrap();

    assert!(enqueue_report_job(&pool, run.id, 5).await.unwrap());
    assert!(!enqueue_report_job(&pool, run.id, 5).await.unwrap());

    let job = get_job_for_run(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(job.status, "queued");
    assert_eq!(job.attempts, 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn claim_complete_cycle(pool: sqlx::PgPool) {
    let company_id = seed_company(&pool).await;
    let run = create_report_run(&pool, company_id).await.unwrap();
    enqueue_report_job(&pool, run.id, 5).await.unwrap();

    let job = claim_next_job(&pool, "worker-a").await.unwrap().unwrap();
    assert_eq!(job.run_id, run.id);
    assert_eq!(job.status, "running");
    assert_eq!(job.attempts, 1);
    assert_eq!(job.locked_by.as_deref(), Some("worker-a"));

    // Nothing else is claimable while the job is held.
    assert!(claim_next_job(&pool, "worker-b").await.unwrap().is_none());

    complete_job(&pool, job.id).await.unwrap();
    let done = get_job_for_run(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(done.status, "done");
    assert!(complete_job(&pool, job.id).await.is_err());
}

#[sqlx::test(migrations = "../../migrations")]
async fn failed_job_backs_off_then_dies(pool: sqlx::PgPool) {
    let company_id = seed_company(&pool).await;
    let run = create_report_run(&pool, company_id).await.unwrap();
    enqueue_report_job(&pool, run.id, 2).await.unwrap();

    let job = claim_next_job(&pool, "worker-a").await.unwrap().unwrap();
    let status = release_job_for_retry(&pool, &job, "database unavailable", 30)
        .await
        .unwrap();
    assert_eq!(status, aivis_core::JobStatus::Queued);

    let queued = get_job_for_run(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(queued.status, "queued");
    assert_eq!(queued.last_error.as_deref(), Some("database unavailable"));
    assert!(queued.run_after > chrono::Utc::now());
    // Backed off: not claimable yet.
    assert!(claim_next_job(&pool, "worker-a").await.unwrap().is_none());

    sqlx::query("UPDATE report_jobs SET run_after = NOW() WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await
        .unwrap();
    let second = claim_next_job(&pool, "worker-a").await.unwrap().unwrap();
    assert_eq!(second.attempts, 2);
    let status = release_job_for_retry(&pool, &second, "still down", 30)
        .await
        .unwrap();
    assert_eq!(status, aivis_core::JobStatus::Dead);
    assert!(claim_next_job(&pool, "worker-a").await.unwrap().is_none());

    assert!(requeue_dead_job(&pool, run.id, 3).await.unwrap());
    let revived = get_job_for_run(&pool, run.id).await.unwrap().unwrap();
    assert_eq!(revived.status, "queued");
    assert_eq!(revived.attempts, 0);
    assert_eq!(revived.max_attempts, 3);
    // Only dead jobs are revived.
    assert!(!requeue_dead_job(&pool, run.id, 3).await.unwrap());
}

#[sqlx::test(migrations = "../../migrations")]
async fn stale_locks_are_reclaimed(pool: sqlx::PgPool) {
    let company_id = seed_company(&pool).await;
    let run = create_report_run(&pool, company_id).await.unwrap();
    enqueue_report_job(&pool, run.id, 5).await.unwrap();
    let job = claim_next_job(&pool, "crashed-worker").await.unwrap().unwrap();

    assert_eq!(reclaim_stale_jobs(&pool, 1800).await.unwrap(), 0);

    sqlx::query("UPDATE report_jobs SET locked_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(reclaim_stale_jobs(&pool, 1800).await.unwrap(), 1);

    let reclaimed = claim_next_job(&pool, "worker-b").await.unwrap().unwrap();
    assert_eq!(reclaimed.id, job.id);
    assert_eq!(reclaimed.attempts, 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn reclaiming_an_exhausted_job_fails_its_run(pool: sqlx::PgPool) {
    let (_, _, run_id) = seed_running_run(&pool).await;
    enqueue_report_job(&pool, run_id, 1).await.unwrap();
    let job = claim_next_job(&pool, "crashed-worker").await.unwrap().unwrap();
    assert!(job.attempts_exhausted());

    sqlx::query("UPDATE report_jobs SET locked_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(reclaim_stale_jobs(&pool, 1800).await.unwrap(), 1);

    let job = get_job_for_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(job.job_status().unwrap(), aivis_core::JobStatus::Dead);
    let run = get_report_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(run.run_status().unwrap(), aivis_core::RunStatus::Failed);
    assert!(run
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("lock expired")));
}
