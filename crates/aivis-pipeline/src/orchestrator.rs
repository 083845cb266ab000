//! Run Orchestrator: drives one report run from `pending` to a terminal state.
//!
//! Stages run in order, each under its own deadline:
//!
//! 1. load the company and its active questions
//! 2. generate one answer per (question, model) pair; detection for a pair
//!    starts as soon as its answer arrives
//! 3. tag each answer's text with its complete mention list and extract
//!    citations from the same raw text
//! 4. turn newly discovered brands into competitors
//! 5. recompute the run's cost from persisted cost records and complete
//!
//! Backend failures are local: they become failed answers or counters and
//! the run still completes. Missing inputs fail a run. Store errors leave it
//! `running` for the queue to redeliver; the redelivered run is reset.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use aivis_analysis::{
    calculate_cost, extract_citations, select_new_competitors, tag_mentions, CostBreakdown,
    TagOptions,
};
use aivis_backend::{
    AnswerRequest, BackendError, Backends, DetectRequest, Detection, GeneratedAnswer,
};
use aivis_core::{
    AnswerStatus, AppConfig, DetectedMention, InvocationKind, PricingTable, RunStatus, TokenUsage,
};
use aivis_db::{NewAnswer, NewCitation, NewCostRecord, NewMention, RunCounters};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::store::{CompanyRecord, QuestionRecord, RunRecord, RunStore};

pub const STEP_LOADING: &str = "Loading questions";
pub const STEP_GENERATING: &str = "Generating answers";
pub const STEP_DETECTING: &str = "Detecting mentions";
pub const STEP_ENRICHING: &str = "Enriching competitors";
pub const STEP_COSTING: &str = "Computing costs";

pub const NO_ACTIVE_QUESTIONS: &str = "no active questions";

/// Knobs the orchestrator reads from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub models: Vec<String>,
    pub web_search_enabled: bool,
    pub answer_max_tokens: u32,
    pub answer_timeout: Duration,
    pub detect_timeout: Duration,
    pub detect_model: String,
    pub max_concurrent_calls: usize,
    pub stage_timeout: Duration,
    pub tag_position_attributes: bool,
}

impl RunSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            models: config.models.clone(),
            web_search_enabled: config.web_search_enabled,
            answer_max_tokens: config.answer_max_tokens,
            answer_timeout: config.answer_timeout(config.web_search_enabled),
            detect_timeout: Duration::from_secs(config.detect_timeout_secs),
            detect_model: config.detect_model.clone(),
            max_concurrent_calls: config.run_max_concurrent_calls.max(1),
            stage_timeout: Duration::from_secs(config.stage_timeout_secs),
            tag_position_attributes: config.tag_position_attributes,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: i64,
    pub trace_id: Uuid,
    pub answers_succeeded: usize,
    pub mentions: usize,
    pub citations: u64,
    pub new_competitors: Vec<String>,
    pub counters: RunCounters,
    pub usd_cost: Decimal,
    pub tokens_used: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// The run was marked `failed` for a pipeline-level reason.
    Failed { reason: String },
    /// The run was already `completed` or `failed`; nothing was done.
    AlreadyTerminal { status: RunStatus },
}

/// Backend results for one (question, model) pair. `detection` is `None`
/// when generation failed.
struct PairResult {
    generated: Result<GeneratedAnswer, BackendError>,
    detection: Option<Result<Detection, BackendError>>,
}

/// A persisted answer awaiting tagging.
struct StoredAnswer {
    id: i64,
    raw_text: String,
    detection: Result<Detection, BackendError>,
}

/// Running totals kept while the run executes.
#[derive(Default)]
struct RunTally {
    counters: RunCounters,
    cost: CostBreakdown,
    tokens: i64,
    mentions: usize,
    citations: u64,
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    backends: Backends,
    pricing: Arc<PricingTable>,
    settings: RunSettings,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn RunStore>,
        backends: Backends,
        pricing: Arc<PricingTable>,
        settings: RunSettings,
    ) -> Self {
        Self {
            store,
            backends,
            pricing,
            settings,
        }
    }

    /// Execute run `run_id` to completion.
    ///
    /// Redelivery of a terminal run is a no-op. A `running` run (its previous
    /// worker died) is reset first so nothing it produced is counted twice.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RunNotFound`] if the run does not exist, or
    /// [`PipelineError::Store`] if persistence fails. The run is then left
    /// as it was so a redelivery can reset and retry it.
    pub async fn execute_run(&self, run_id: i64) -> Result<RunOutcome, PipelineError> {
        let run = self
            .store
            .load_run(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(run_id))?;

        match run.status {
            RunStatus::Completed | RunStatus::Failed => {
                tracing::info!(run_id, status = %run.status, "report run already terminal, skipping");
                return Ok(RunOutcome::AlreadyTerminal { status: run.status });
            }
            RunStatus::Running => {
                tracing::warn!(run_id, "report run was left running, resetting before re-execution");
                self.store.reset_running_run(run_id).await?;
            }
            RunStatus::Pending => {}
        }

        let trace_id = Uuid::new_v4();
        let span = tracing::info_span!("report_run", run_id, %trace_id);

        let result = self.run_stages(&run, trace_id).instrument(span).await;
        if let Err(err) = &result {
            tracing::error!(run_id, %trace_id, error = %err, "report run interrupted; left for redelivery");
        }
        result
    }

    /// Mark a non-terminal run `failed` once its job has given up on it.
    /// A run that is already terminal is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the run cannot be read or updated.
    pub async fn abandon_run(&self, run_id: i64, reason: &str) -> Result<(), PipelineError> {
        match self.store.load_run(run_id).await? {
            Some(run) if !run.status.is_terminal() => {
                tracing::error!(run_id, reason, "report run abandoned");
                self.store.fail_run(run_id, reason).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn fail(&self, run_id: i64, reason: String) -> Result<RunOutcome, PipelineError> {
        tracing::error!(run_id, %reason, "report run failed");
        self.store.fail_run(run_id, &reason).await?;
        Ok(RunOutcome::Failed { reason })
    }

    async fn run_stages(
        &self,
        run: &RunRecord,
        trace_id: Uuid,
    ) -> Result<RunOutcome, PipelineError> {
        let run_id = run.id;
        self.store.start_run(run_id, trace_id, STEP_LOADING).await?;
        tracing::info!("report run started");

        let Some(company) = self.store.load_company(run.company_id).await? else {
            return self
                .fail(run_id, format!("company {} not found", run.company_id))
                .await;
        };
        let questions = self.store.list_active_questions(company.id).await?;
        if questions.is_empty() {
            return self.fail(run_id, NO_ACTIVE_QUESTIONS.to_string()).await;
        }
        if self.settings.models.is_empty() {
            return self.fail(run_id, "no models configured".to_string()).await;
        }
        let competitors = self.store.list_competitor_names(company.id).await?;

        let mut tally = RunTally::default();

        self.store.set_step(run_id, STEP_GENERATING).await?;
        let answers = self
            .generate_answers(run_id, &company, &competitors, &questions, &mut tally)
            .await?;
        let answers_succeeded = answers.len();

        self.store.set_step(run_id, STEP_DETECTING).await?;
        let mentions = self
            .tag_answers(run_id, &company, answers, &mut tally)
            .await?;

        self.store.set_step(run_id, STEP_ENRICHING).await?;
        let candidates = select_new_competitors(
            &company.name,
            competitors.iter().map(String::as_str),
            &mentions,
        );
        let new_competitors = if candidates.is_empty() {
            Vec::new()
        } else {
            self.store
                .insert_generated_competitors(company.id, &candidates)
                .await?
        };
        if !new_competitors.is_empty() {
            tracing::info!(count = new_competitors.len(), "new competitors discovered");
        }

        self.store.set_step(run_id, STEP_COSTING).await?;
        let totals = self.store.sum_run_costs(run_id).await?;
        if totals.usd_cost != tally.cost.total_cost || totals.tokens_used != tally.tokens {
            tracing::error!(
                persisted_usd = %totals.usd_cost,
                computed_usd = %tally.cost.total_cost,
                persisted_tokens = totals.tokens_used,
                computed_tokens = tally.tokens,
                "cost discrepancy between persisted records and in-memory total"
            );
        }

        self.store
            .complete_run(run_id, totals.usd_cost, totals.tokens_used, &tally.counters)
            .await?;

        tracing::info!(
            answers = answers_succeeded,
            failed_answers = tally.counters.failed_answers,
            failed_questions = tally.counters.failed_questions,
            failed_detections = tally.counters.failed_detections,
            tagging_failures = tally.counters.tagging_failures,
            unpriced_invocations = tally.counters.unpriced_invocations,
            usd_cost = %totals.usd_cost.round_dp(2),
            "report run completed"
        );

        Ok(RunOutcome::Completed(RunSummary {
            run_id,
            trace_id,
            answers_succeeded,
            mentions: tally.mentions,
            citations: tally.citations,
            new_competitors,
            counters: tally.counters,
            usd_cost: totals.usd_cost,
            tokens_used: totals.tokens_used,
        }))
    }

    /// Stage 2. Every pair gets an answer row, succeeded or failed.
    async fn generate_answers(
        &self,
        run_id: i64,
        company: &CompanyRecord,
        competitors: &[String],
        questions: &[QuestionRecord],
        tally: &mut RunTally,
    ) -> Result<Vec<StoredAnswer>, PipelineError> {
        let pairs: Vec<(&QuestionRecord, &str)> = questions
            .iter()
            .flat_map(|q| self.settings.models.iter().map(move |m| (q, m.as_str())))
            .collect();

        let results = self.call_backends(company, competitors, &pairs).await;

        let mut stored = Vec::new();
        let mut answered_questions: HashSet<i64> = HashSet::new();

        for (&(question, model_id), result) in pairs.iter().zip(results) {
            match result.generated {
                Ok(answer) => {
                    let answer_id = self
                        .store
                        .insert_answer(&NewAnswer {
                            run_id,
                            question_id: question.id,
                            model_id,
                            status: AnswerStatus::Succeeded,
                            raw_text: Some(&answer.answer_text),
                            error_message: None,
                            usage: answer.usage,
                            web_search_enabled: self.settings.web_search_enabled,
                        })
                        .await?;
                    self.record_cost(
                        run_id,
                        Some(answer_id),
                        InvocationKind::Generation,
                        model_id,
                        answer.usage,
                        tally,
                    )
                    .await?;
                    answered_questions.insert(question.id);
                    stored.push(StoredAnswer {
                        id: answer_id,
                        raw_text: answer.answer_text,
                        detection: result.detection.unwrap_or_else(|| {
                            Err(BackendError::Timeout(self.settings.stage_timeout))
                        }),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        question_id = question.id,
                        model_id,
                        error = %err,
                        "answer generation failed"
                    );
                    if matches!(err, BackendError::UnknownModel(_)) {
                        tracing::error!(model_id, "model has no pricing entry; invocation not priced");
                        tally.counters.unpriced_invocations += 1;
                    }
                    let message = err.to_string();
                    self.store
                        .insert_answer(&NewAnswer {
                            run_id,
                            question_id: question.id,
                            model_id,
                            status: AnswerStatus::Failed,
                            raw_text: None,
                            error_message: Some(&message),
                            usage: TokenUsage::default(),
                            web_search_enabled: self.settings.web_search_enabled,
                        })
                        .await?;
                    tally.counters.failed_answers += 1;
                }
            }
        }

        tally.counters.failed_questions = count(
            questions
                .iter()
                .filter(|q| !answered_questions.contains(&q.id))
                .count(),
        );

        tracing::info!(
            pairs = pairs.len(),
            succeeded = stored.len(),
            "answer generation finished"
        );
        Ok(stored)
    }

    /// Stage 3. Returns every detected mention for enrichment.
    async fn tag_answers(
        &self,
        run_id: i64,
        company: &CompanyRecord,
        answers: Vec<StoredAnswer>,
        tally: &mut RunTally,
    ) -> Result<Vec<DetectedMention>, PipelineError> {
        let options = TagOptions {
            company_name: &company.name,
            position_attributes: self.settings.tag_position_attributes,
        };
        let mut all_mentions = Vec::new();

        for answer in answers {
            match answer.detection {
                Ok(detection) => {
                    let report = tag_mentions(&answer.raw_text, &detection.mentions, &options);
                    self.store
                        .set_tagged_text(answer.id, &report.tagged_text)
                        .await?;

                    let rows: Vec<NewMention<'_>> = detection
                        .mentions
                        .iter()
                        .zip(&report.outcomes)
                        .map(|(mention, outcome)| NewMention {
                            name: &mention.name,
                            kind: mention.kind,
                            confidence: mention.confidence,
                            context_snippet: mention.context.as_deref(),
                            char_offset: i64::try_from(mention.offset).unwrap_or(i64::MAX),
                            tag_status: outcome.status(),
                            tag_detail: outcome.detail(),
                        })
                        .collect();
                    self.store.insert_mentions(answer.id, &rows).await?;

                    let failures = report.failure_count();
                    if failures > 0 {
                        tracing::warn!(answer_id = answer.id, failures, "some mentions could not be tagged");
                    }
                    tally.counters.tagging_failures += count(failures);
                    tally.mentions += detection.mentions.len();

                    if let Some(usage) = detection.usage {
                        let model_id = detection
                            .model_id
                            .as_deref()
                            .unwrap_or(&self.settings.detect_model);
                        self.record_cost(
                            run_id,
                            Some(answer.id),
                            InvocationKind::Detection,
                            model_id,
                            usage,
                            tally,
                        )
                        .await?;
                    }

                    all_mentions.extend(detection.mentions);
                }
                Err(err) => {
                    tracing::warn!(answer_id = answer.id, error = %err, "mention detection failed; answer left untagged");
                    tally.counters.failed_detections += 1;
                    self.store
                        .set_tagged_text(answer.id, &answer.raw_text)
                        .await?;
                }
            }

            let citations = extract_citations(&answer.raw_text);
            let rows: Vec<NewCitation<'_>> = citations
                .iter()
                .map(|c| NewCitation {
                    url: &c.url,
                    normalized_url: &c.normalized_url,
                    domain: &c.domain,
                    title: &c.title,
                    source_kind: c.source,
                })
                .collect();
            tally.citations += self.store.insert_citations(answer.id, &rows).await?;
        }

        Ok(all_mentions)
    }

    /// Price one invocation and persist the breakdown. An unknown model is
    /// counted, never priced at zero.
    async fn record_cost(
        &self,
        run_id: i64,
        answer_id: Option<i64>,
        invocation: InvocationKind,
        model_id: &str,
        usage: TokenUsage,
        tally: &mut RunTally,
    ) -> Result<(), PipelineError> {
        let breakdown = match calculate_cost(&self.pricing, model_id, &usage) {
            Ok(breakdown) => breakdown,
            Err(err) => {
                tracing::error!(
                    model_id,
                    invocation = %invocation,
                    error = %err,
                    "invocation not priced"
                );
                tally.counters.unpriced_invocations += 1;
                return Ok(());
            }
        };

        self.store
            .insert_cost_record(&NewCostRecord {
                run_id,
                answer_id,
                invocation,
                model_id,
                usage,
                input_cost: breakdown.input_cost,
                output_cost: breakdown.output_cost,
                thinking_cost: breakdown.thinking_cost,
                caching_cost: breakdown.caching_cost,
                search_cost: breakdown.search_cost,
                total_cost: breakdown.total_cost,
            })
            .await?;

        tally.cost += breakdown;
        tally.tokens = tally.tokens.saturating_add(usage.total_tokens());
        Ok(())
    }

    /// Generate every pair with bounded concurrency, chaining detection
    /// onto each successful answer. Generation must finish by one stage
    /// deadline and detection by the next; a call still running at its
    /// deadline is abandoned as a timeout. Results are index-aligned with
    /// `pairs`.
    async fn call_backends(
        &self,
        company: &CompanyRecord,
        competitors: &[String],
        pairs: &[(&QuestionRecord, &str)],
    ) -> Vec<PairResult> {
        let stage_timeout = self.settings.stage_timeout;
        let generation_deadline = Instant::now() + stage_timeout;
        let detection_deadline = generation_deadline + stage_timeout;

        let calls: Vec<_> = pairs.iter().enumerate().map(|(idx, (question, model_id))| {
            let answers = Arc::clone(&self.backends.answers);
            let detector = Arc::clone(&self.backends.detector);
            let request = AnswerRequest {
                question: question.text.clone(),
                company_name: company.name.clone(),
                competitors: competitors.to_vec(),
                web_search_enabled: self.settings.web_search_enabled,
                model_id: (*model_id).to_string(),
                max_tokens: self.settings.answer_max_tokens,
                timeout: self.settings.answer_timeout,
            };
            let detect_timeout = self.settings.detect_timeout;

            async move {
                let generated = tokio::time::timeout_at(generation_deadline, answers.generate(&request))
                    .await
                    .unwrap_or_else(|_| {
                        tracing::warn!(stage = "generation", model_id = %request.model_id, "stage deadline reached; call abandoned");
                        Err(BackendError::Timeout(stage_timeout))
                    });

                let detection = match &generated {
                    Ok(answer) => {
                        let request = DetectRequest {
                            text: answer.answer_text.clone(),
                            company_name: request.company_name,
                            competitors: request.competitors,
                            timeout: detect_timeout,
                        };
                        let result = tokio::time::timeout_at(detection_deadline, detector.detect(&request))
                            .await
                            .unwrap_or_else(|_| {
                                tracing::warn!(stage = "detection", "stage deadline reached; call abandoned");
                                Err(BackendError::Timeout(stage_timeout))
                            });
                        Some(result)
                    }
                    Err(_) => None,
                };

                (idx, PairResult { generated, detection })
            }
        }).collect();

        let mut results: Vec<Option<PairResult>> = (0..pairs.len()).map(|_| None).collect();
        let mut pending =
            stream::iter(calls).buffer_unordered(self.settings.max_concurrent_calls.max(1));
        while let Some((idx, result)) = pending.next().await {
            results[idx] = Some(result);
        }

        results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| PairResult {
                    generated: Err(BackendError::Timeout(stage_timeout)),
                    detection: None,
                })
            })
            .collect()
    }
}
