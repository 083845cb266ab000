//! Retry with exponential back-off and jitter for backend invocations.
//!
//! [`retry_with_backoff`] re-runs an operation while
//! [`BackendError::is_retriable`] holds. Each attempt carries its own
//! timeout inside the operation; this module only spaces attempts apart.

use std::future::Future;
use std::time::Duration;

use crate::error::BackendError;

const MAX_DELAY_MS: u64 = 60_000;
const MAX_EXPONENT: u32 = 10;

/// How many extra attempts to make and how far apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay after failed attempt `attempt` (1-based):
    /// `base × 2^(attempt-1)`, capped at 60 s.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1_u64 << exponent)
            .min(MAX_DELAY_MS);
        Duration::from_millis(ms)
    }
}

/// Scale `delay` by a random factor in [0.75, 1.25).
fn jittered(delay: Duration) -> Duration {
    delay.mul_f64(0.75 + rand::random::<f64>() * 0.5)
}

/// Runs `operation`, retrying transient failures up to
/// `policy.max_retries` times. Non-retriable errors return immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut operation: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut failures = 0_u32;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_retriable() || failures >= policy.max_retries {
            return Err(err);
        }
        failures += 1;

        let delay = jittered(policy.base_delay(failures));
        tracing::warn!(
            backend = what,
            retry = failures,
            max_retries = policy.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "transient backend error, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}
