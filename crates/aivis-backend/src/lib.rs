//! Clients for the external answer-generation and mention-detection
//! backends.
//!
//! Both clients speak the same line-JSON contract over a pluggable
//! [`Transport`] and share one retry policy. [`build_backends`] wires them
//! from [`AppConfig`].

pub mod answer;
pub mod detect;
pub mod error;
pub mod retry;
pub mod transport;
mod wire;

use std::sync::Arc;

use aivis_core::{AppConfig, BackendTransport, PricingTable};

pub use answer::{AnswerClient, AnswerGenerator, AnswerRequest, GeneratedAnswer};
pub use detect::{DetectClient, DetectRequest, Detection, MentionDetector};
pub use error::BackendError;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use transport::{HttpTransport, SubprocessTransport, Transport};

/// The two backends a report run talks to.
#[derive(Clone)]
pub struct Backends {
    pub answers: Arc<dyn AnswerGenerator>,
    pub detector: Arc<dyn MentionDetector>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

fn make_transport(
    kind: BackendTransport,
    target: &str,
) -> Result<Arc<dyn Transport>, BackendError> {
    Ok(match kind {
        BackendTransport::Subprocess => Arc::new(SubprocessTransport::from_command_line(target)?),
        BackendTransport::Http => Arc::new(HttpTransport::new(target)?),
    })
}

/// Builds the answer and detection clients described by `config`.
///
/// # Errors
///
/// Returns [`BackendError::InvalidRequest`] if a backend command line is blank
/// or a backend URL does not parse, or [`BackendError::Http`] if the HTTP
/// client cannot be constructed.
pub fn build_backends(
    config: &AppConfig,
    pricing: Arc<PricingTable>,
) -> Result<Backends, BackendError> {
    let retry = RetryPolicy {
        max_retries: config.backend_max_retries,
        backoff_base_ms: config.backend_retry_backoff_base_ms,
    };
    let answer_transport = make_transport(config.backend_transport, &config.answer_backend)?;
    let detect_transport = make_transport(config.backend_transport, &config.detect_backend)?;

    tracing::info!(
        transport = %config.backend_transport,
        max_retries = retry.max_retries,
        "backend clients configured"
    );

    Ok(Backends {
        answers: Arc::new(AnswerClient::new(answer_transport, pricing, retry)),
        detector: Arc::new(DetectClient::new(detect_transport, retry)),
    })
}

#[cfg(test)]
#[path = "client_test.rs"]
mod client_test;
