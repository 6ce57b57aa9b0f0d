//! Retry logic with exponential backoff
//!
//! Every attempt first takes a token from the shared [`RateLimiter`]. Transient
//! failures back off exponentially with optional jitter; 429 responses pause the
//! limiter and retry without consuming the attempt budget.
//!
//! # Example
//!
//! ```no_run
//! use lms_qa::retry::{CallCounters, IsRetryable, with_retry};
//! use lms_qa::config::RetryConfig;
//! use lms_qa::rate_limiter::RateLimiter;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let limiter = RateLimiter::with_limits(180, 4800);
//! let counters = CallCounters::default();
//! with_retry(&RetryConfig::default(), &limiter, 10, &counters, || async {
//!     Ok::<_, MyError>(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::ContentError;
use crate::rate_limiter::RateLimiter;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, 502/503, connection reset) should return `true`.
/// Permanent failures (bad token, missing item, malformed data) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Returns true if the server asked the client to slow down
    fn is_rate_limited(&self) -> bool {
        false
    }

    /// Server-provided wait before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl IsRetryable for ContentError {
    fn is_retryable(&self) -> bool {
        matches!(self, ContentError::Transient { .. })
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, ContentError::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ContentError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Request counters shared by the calls of one execution
#[derive(Debug, Default)]
pub struct CallCounters {
    api_calls: AtomicU64,
    rate_limit_waits: AtomicU64,
}

impl CallCounters {
    /// Requests sent, including retries
    pub fn api_calls(&self) -> u64 {
        self.api_calls.load(Ordering::Relaxed)
    }

    /// Times a request was held back by the limiter or a 429
    pub fn rate_limit_waits(&self) -> u64 {
        self.rate_limit_waits.load(Ordering::Relaxed)
    }

    fn record_call(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn record_wait(&self) {
        self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
    }
}

/// Execute an async operation behind the rate limiter, retrying transient failures
///
/// * `config` - attempt budget and backoff shape; `max_attempts` counts the first call
/// * `limiter` - acquired before every attempt
/// * `max_rate_limit_waits` - 429 responses tolerated before the error is returned
/// * `counters` - incremented for every request sent and every wait
///
/// Returns the successful result or the last error.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    limiter: &RateLimiter,
    max_rate_limit_waits: u32,
    counters: &CallCounters,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut rate_limit_waits = 0;
    let mut delay = config.initial_delay;

    loop {
        if !limiter.acquire().await.is_zero() {
            counters.record_wait();
        }
        counters.record_call();

        match operation().await {
            Ok(result) => {
                if attempt > 1 || rate_limit_waits > 0 {
                    tracing::info!(attempts = attempt, rate_limit_waits, "Request succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_rate_limited() && rate_limit_waits < max_rate_limit_waits => {
                rate_limit_waits += 1;
                counters.record_wait();
                let wait = limiter.penalize(e.retry_after()).await;

                tracing::warn!(
                    error = %e,
                    rate_limit_waits,
                    max_rate_limit_waits,
                    delay_ms = wait.as_millis() as u64,
                    "Rate limited by server, waiting for window"
                );
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Request failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() || e.is_rate_limited() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        rate_limit_waits,
                        "Request failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Request failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
