//! Mention Detection Client: classify brand and product references in one
//! answer text.
//!
//! The text is forwarded exactly as given so that the returned character
//! offsets index the same string the tagger later rewrites.

use std::sync::Arc;
use std::time::Duration;

use aivis_core::{DetectedMention, MentionKind, TokenUsage};
use async_trait::async_trait;

use crate::error::BackendError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::transport::Transport;
use crate::wire::{DetectWireRequest, DetectWireResponse, WireMention};

#[derive(Debug, Clone)]
pub struct DetectRequest {
    pub text: String,
    pub company_name: String,
    pub competitors: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub mentions: Vec<DetectedMention>,
    /// Present only when the backend reports what it consumed.
    pub usage: Option<TokenUsage>,
    pub model_id: Option<String>,
}

#[async_trait]
pub trait MentionDetector: Send + Sync {
    /// # Errors
    ///
    /// Returns [`BackendError`] when the backend cannot be reached within the
    /// retry budget or its reply cannot be parsed.
    async fn detect(&self, request: &DetectRequest) -> Result<Detection, BackendError>;
}

pub struct DetectClient {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl DetectClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }
}

fn convert_mention(wire: WireMention) -> Option<DetectedMention> {
    if wire.name.trim().is_empty() {
        tracing::warn!("dropping detected mention with blank name");
        return None;
    }
    if !(0.0..=1.0).contains(&wire.confidence) {
        tracing::warn!(
            name = %wire.name,
            confidence = wire.confidence,
            "dropping detected mention with confidence outside [0, 1]"
        );
        return None;
    }
    let Ok(offset) = usize::try_from(wire.position) else {
        tracing::warn!(name = %wire.name, position = wire.position, "dropping detected mention with negative position");
        return None;
    };
    let kind = match wire.kind.to_ascii_lowercase().parse::<MentionKind>() {
        Ok(kind) => kind,
        Err(e) => {
            tracing::warn!(name = %wire.name, error = %e, "dropping detected mention with unknown type");
            return None;
        }
    };
    Some(DetectedMention {
        name: wire.name,
        kind,
        confidence: wire.confidence,
        context: wire.context.filter(|c| !c.trim().is_empty()),
        offset,
    })
}

pub(crate) fn parse_detection(body: &str) -> Result<Detection, BackendError> {
    let response: DetectWireResponse =
        serde_json::from_str(body).map_err(|source| BackendError::Deserialize {
            context: "detection response".to_string(),
            source,
        })?;

    if let Some(error) = response.error {
        return Err(BackendError::Backend(error));
    }

    let mentions = response
        .mentions
        .unwrap_or_default()
        .into_iter()
        .filter_map(convert_mention)
        .collect();

    Ok(Detection {
        mentions,
        usage: response.tokens_used.map(|t| TokenUsage {
            input_tokens: t.input,
            output_tokens: t.output,
            cached_tokens: t.cached,
            thinking_tokens: t.thinking,
            searches: 0,
        }),
        model_id: response.model.filter(|m| !m.trim().is_empty()),
    })
}

#[async_trait]
impl MentionDetector for DetectClient {
    async fn detect(&self, request: &DetectRequest) -> Result<Detection, BackendError> {
        let body = serde_json::to_string(&DetectWireRequest {
            text: &request.text,
            company_name: &request.company_name,
            competitors: &request.competitors,
        })
        .map_err(|source| BackendError::Deserialize {
            context: "detection request".to_string(),
            source,
        })?;

        let detection = retry_with_backoff(self.retry, "detect", || {
            let transport = Arc::clone(&self.transport);
            let body = body.as_str();
            let timeout = request.timeout;
            async move {
                let reply = transport.exchange(body, timeout).await?;
                parse_detection(&reply)
            }
        })
        .await?;

        tracing::debug!(
            mentions = detection.mentions.len(),
            transport = self.transport.kind(),
            "mentions detected"
        );
        Ok(detection)
    }
}
