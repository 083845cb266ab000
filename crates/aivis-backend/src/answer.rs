//! Answer Generation Client: one question to one model, one answer back.

use std::sync::Arc;
use std::time::Duration;

use aivis_core::{PricingTable, TokenUsage};
use async_trait::async_trait;

use crate::error::BackendError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::transport::Transport;
use crate::wire::{AnswerWireRequest, AnswerWireResponse};

#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub question: String,
    pub company_name: String,
    pub competitors: Vec<String>,
    pub web_search_enabled: bool,
    pub model_id: String,
    pub max_tokens: u32,
    /// Hard wall-clock limit for each attempt.
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAnswer {
    pub answer_text: String,
    pub usage: TokenUsage,
}

/// Produces an answer for one (question, model) pair.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// # Errors
    ///
    /// Returns [`BackendError`] when validation fails, the backend cannot be
    /// reached within the retry budget, or its reply violates the contract.
    async fn generate(&self, request: &AnswerRequest) -> Result<GeneratedAnswer, BackendError>;
}

/// [`AnswerGenerator`] backed by a [`Transport`].
pub struct AnswerClient {
    transport: Arc<dyn Transport>,
    pricing: Arc<PricingTable>,
    retry: RetryPolicy,
}

impl AnswerClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, pricing: Arc<PricingTable>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            pricing,
            retry,
        }
    }

    fn validate(&self, request: &AnswerRequest) -> Result<(), BackendError> {
        if request.question.trim().is_empty() {
            return Err(BackendError::InvalidRequest(
                "question text is empty".to_string(),
            ));
        }
        if !self.pricing.contains(&request.model_id) {
            return Err(BackendError::UnknownModel(request.model_id.clone()));
        }
        Ok(())
    }
}

pub(crate) fn parse_answer(body: &str) -> Result<GeneratedAnswer, BackendError> {
    let response: AnswerWireResponse =
        serde_json::from_str(body).map_err(|source| BackendError::Deserialize {
            context: "answer response".to_string(),
            source,
        })?;

    if let Some(error) = response.error {
        return Err(BackendError::Backend(error));
    }

    let answer_text = response
        .answer
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| BackendError::InvalidResponse("answer text is empty".to_string()))?;

    let tokens = response.tokens_used.unwrap_or_default();
    Ok(GeneratedAnswer {
        answer_text,
        usage: TokenUsage {
            input_tokens: tokens.input,
            output_tokens: tokens.output,
            cached_tokens: tokens.cached,
            thinking_tokens: tokens.thinking,
            searches: response.search_count.unwrap_or(0),
        },
    })
}

#[async_trait]
impl AnswerGenerator for AnswerClient {
    async fn generate(&self, request: &AnswerRequest) -> Result<GeneratedAnswer, BackendError> {
        self.validate(request)?;

        let body = serde_json::to_string(&AnswerWireRequest {
            question: &request.question,
            company_name: &request.company_name,
            competitors: &request.competitors,
            web_search_enabled: request.web_search_enabled,
            max_tokens: request.max_tokens,
            model: &request.model_id,
        })
        .map_err(|source| BackendError::Deserialize {
            context: "answer request".to_string(),
            source,
        })?;

        let answer = retry_with_backoff(self.retry, "answer", || {
            let transport = Arc::clone(&self.transport);
            let body = body.as_str();
            let timeout = request.timeout;
            async move {
                let reply = transport.exchange(body, timeout).await?;
                parse_answer(&reply)
            }
        })
        .await?;

        tracing::debug!(
            model_id = %request.model_id,
            transport = self.transport.kind(),
            input_tokens = answer.usage.input_tokens,
            output_tokens = answer.usage.output_tokens,
            searches = answer.usage.searches,
            "answer generated"
        );

        Ok(answer)
    }
}
