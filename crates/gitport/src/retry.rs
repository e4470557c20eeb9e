//! Retry and rate-limiting policy for API operations.
//!
//! Every single API call the orchestrator makes (group lookup, export start,
//! status poll, ...) goes through [`with_retry`]: transient failures are
//! retried with exponential backoff, permanent failures surface immediately,
//! and exhausting the attempt budget turns the last transient failure into a
//! permanent one for the caller.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::api::ApiError;
use crate::api::error::short_error_message;
use crate::migrate::{MigrateProgress, ProgressCallback, emit};

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Maximum attempts for a single API call.
pub const MAX_ATTEMPTS: usize = 5;

/// Configuration for retry operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Minimum delay between retries.
    pub min_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of attempts (first try included).
    pub max_attempts: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_attempts: MAX_ATTEMPTS,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_attempts: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_attempts,
            with_jitter: true,
        }
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build the sequence of backoff delays between attempts.
    ///
    /// `max_attempts` attempts leave room for `max_attempts - 1` waits, so
    /// the iterator is capped one below the attempt budget.
    fn delays(&self) -> impl Iterator<Item = Duration> {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1));

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder.build()
    }
}

/// Execute an API operation with bounded retries and backoff.
///
/// Transient errors (rate limits, timeouts, connection failures, 5xx) are
/// retried until the attempt budget runs out; a rate-limit `Retry-After` hint
/// extends the computed delay so the server's wait is always honored.
/// Permanent errors return on the first occurrence.
///
/// `operation_name` and `subject` identify the call in backoff progress
/// events and logs ("start_export" on "teamA/sub1/app").
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    subject: &str,
    on_progress: Option<&ProgressCallback>,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut delays = config.delays();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                let Some(mut delay) = delays.next() else {
                    tracing::warn!(
                        operation = operation_name,
                        subject,
                        attempts = attempt,
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(err);
                };
                if let Some(hint) = err.retry_after() {
                    delay = delay.max(hint);
                }

                emit(
                    on_progress,
                    MigrateProgress::RetryBackoff {
                        operation: operation_name.to_string(),
                        subject: subject.to_string(),
                        retry_after_ms: delay.as_millis() as u64,
                        attempt,
                    },
                );
                tracing::debug!(
                    operation = operation_name,
                    subject,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %short_error_message(&err),
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Proactive per-instance request pacing using the governor crate.
///
/// Awaited before every request a [`crate::api::RestClient`] sends, so a run
/// with many concurrent jobs stays under the instance's request budget
/// instead of bouncing off 429s.
#[derive(Clone)]
pub struct ApiRateLimiter {
    inner: Arc<GovernorRateLimiter>,
}

impl ApiRateLimiter {
    /// Create a limiter allowing `requests_per_second` requests (minimum 1).
    #[must_use]
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            inner: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
        }
    }

    /// Wait until the limiter allows another request.
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }
}
