//! Retry driver with exponential backoff
//!
//! Retries are owned here and only here; HTTP clients never retry on their
//! own. Each failed attempt goes through [`should_retry`] and the backoff
//! sleep is cut short by the caller's cancellation token.

use crate::error::ProviderError;
use crate::error_classify::should_retry;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const BENCHMARK_MAX_RETRIES: u32 = 100;
pub const BASE_DELAY_MS: u64 = 500;
pub const MAX_DELAY_MS: u64 = 32_000;

/// Configuration for one retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; the operation runs at most `max_retries + 1` times
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Relaxes the overload rule of the classifier
    pub benchmark_mode: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_mode(false)
    }
}

impl RetryPolicy {
    pub fn for_mode(benchmark_mode: bool) -> Self {
        Self {
            max_retries: if benchmark_mode {
                BENCHMARK_MAX_RETRIES
            } else {
                DEFAULT_MAX_RETRIES
            },
            base_delay_ms: BASE_DELAY_MS,
            max_delay_ms: MAX_DELAY_MS,
            benchmark_mode,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retrying after failed attempt `attempt` (1-based).
    ///
    /// An integer `retry-after` value is taken as seconds; anything else
    /// falls back to capped exponential backoff.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<&str>) -> Duration {
        if let Some(seconds) = retry_after.and_then(|v| v.trim().parse::<u64>().ok()) {
            return Duration::from_secs(seconds);
        }

        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Delay with the default base and ceiling
pub fn retry_delay(attempt: u32, retry_after: Option<&str>) -> Duration {
    RetryPolicy::default().delay_for(attempt, retry_after)
}

/// Emitted once per retry, before the backoff sleep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEvent {
    pub attempt: u32,
    pub max_retries: u32,
    pub delay_ms: u64,
    pub message: String,
    pub status: Option<u16>,
}

/// Run `operation` until it succeeds, fails permanently, or retries run out.
///
/// The operation receives the attempt number starting at 1. Non-API errors,
/// aborts and errors the classifier rejects are returned immediately. The
/// last error is returned unmodified once `max_retries` is exhausted.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut on_retry: impl FnMut(&RetryEvent),
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::Aborted);
        }

        debug!(attempt, max_attempts, "Attempting operation");

        let err = match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => err,
        };

        let Some(api_error) = err.as_api_error() else {
            return Err(err);
        };

        if attempt >= max_attempts || !should_retry(api_error, policy.benchmark_mode) {
            debug!(attempt, error = %api_error, "Not retrying");
            return Err(err);
        }

        let delay = policy.delay_for(attempt, api_error.retry_after.as_deref());
        let event = RetryEvent {
            attempt,
            max_retries: policy.max_retries,
            delay_ms: delay.as_millis() as u64,
            message: api_error.message.clone(),
            status: api_error.status,
        };

        warn!(
            attempt,
            max_retries = policy.max_retries,
            delay_ms = event.delay_ms,
            status = ?event.status,
            "API error ({}) · Retrying in {} seconds…",
            event.message,
            delay.as_secs_f64().round()
        );
        on_retry(&event);

        tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Aborted),
            _ = sleep(delay) => {}
        }

        attempt += 1;
    }
}
