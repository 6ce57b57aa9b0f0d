//! Outbound request rate limiter
//!
//! Enforces two ceilings at once, one per minute and one per hour, shared by every
//! execution talking to the same LMS. Each window keeps the grant times of the
//! last `period`, so no rolling window ever contains more than `limit` grants.
//!
//! A 429 from the server can additionally block all callers for a while via
//! [`RateLimiter::penalize`].
//!
//! # Example
//!
//! ```no_run
//! use lms_qa::rate_limiter::RateLimiter;
//! use lms_qa::config::RateLimitConfig;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(&RateLimitConfig::default());
//! limiter.acquire().await;
//! // ... issue one request ...
//! # }
//! ```

use crate::config::RateLimitConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use utoipa::ToSchema;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// One window of the limiter
#[derive(Debug)]
struct Window {
    limit: u32,
    period: Duration,
    /// Grant times within the last `period`, oldest first
    grants: VecDeque<Instant>,
}

impl Window {
    fn new(limit: u32, period: Duration) -> Self {
        Self {
            limit,
            period,
            grants: VecDeque::with_capacity(limit as usize),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.grants.front() {
            if oldest + self.period <= now {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }

    /// When the next token frees up, or `None` if one is available now
    fn next_free(&self) -> Option<Instant> {
        if (self.grants.len() as u32) < self.limit {
            None
        } else {
            self.grants.front().map(|oldest| *oldest + self.period)
        }
    }

    fn active(&self, now: Instant) -> impl Iterator<Item = &Instant> {
        let period = self.period;
        self.grants.iter().filter(move |t| **t + period > now)
    }

    fn state(&self, now: Instant) -> WindowState {
        let used = self.active(now).count() as u32;
        let reset_in = self
            .active(now)
            .next()
            .map(|oldest| (*oldest + self.period).saturating_duration_since(now))
            .unwrap_or_default();

        WindowState {
            limit: self.limit,
            remaining: self.limit.saturating_sub(used),
            reset_at: to_wall_clock(reset_in),
        }
    }
}

#[derive(Debug)]
struct Windows {
    minute: Window,
    hour: Window,
    /// Set after a 429; nobody acquires before this
    blocked_until: Option<Instant>,
}

/// State of one limiter window
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WindowState {
    /// Configured ceiling
    pub limit: u32,
    /// Tokens available right now
    pub remaining: u32,
    /// When the oldest grant leaves the window (now, if the window is empty)
    pub reset_at: DateTime<Utc>,
}

/// Read-only view of the limiter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RateLimitState {
    /// Per-minute window
    pub minute: WindowState,
    /// Per-hour window
    pub hour: WindowState,
    /// Server-imposed pause after a 429, if one is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
}

/// Two-window rate limiter shared across executions
///
/// Cloning is cheap and yields a handle to the same state.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    windows: Arc<Mutex<Windows>>,
}

impl RateLimiter {
    /// Create a limiter from configuration
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_limits(config.requests_per_minute, config.requests_per_hour)
    }

    /// Create a limiter with explicit ceilings
    pub fn with_limits(per_minute: u32, per_hour: u32) -> Self {
        Self {
            windows: Arc::new(Mutex::new(Windows {
                minute: Window::new(per_minute.max(1), MINUTE),
                hour: Window::new(per_hour.max(1), HOUR),
                blocked_until: None,
            })),
        }
    }

    /// Wait until both windows have a token, then take one from each
    ///
    /// Returns how long the caller was suspended (zero if a token was free).
    /// Acquisition order among concurrent callers is unspecified.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();

        loop {
            let wake_at = {
                let mut windows = self.windows.lock().await;
                let now = Instant::now();
                windows.minute.prune(now);
                windows.hour.prune(now);

                let blocked = windows.blocked_until.filter(|until| *until > now);
                let wake_at = [blocked, windows.minute.next_free(), windows.hour.next_free()]
                    .into_iter()
                    .flatten()
                    .max();

                match wake_at {
                    Some(at) => at,
                    None => {
                        windows.blocked_until = None;
                        windows.minute.grants.push_back(now);
                        windows.hour.grants.push_back(now);
                        return now.saturating_duration_since(started);
                    }
                }
            };

            tracing::debug!(
                wait_ms = wake_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Rate limit reached, waiting for window"
            );
            tokio::time::sleep_until(wake_at).await;
        }
    }

    /// Block all callers after the server answered 429
    ///
    /// Waits `retry_after` when the server sent one, otherwise until the minute
    /// window has room again (at least one second).
    pub async fn penalize(&self, retry_after: Option<Duration>) -> Duration {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();

        let wait = retry_after.unwrap_or_else(|| {
            windows
                .minute
                .grants
                .front()
                .map(|oldest| (*oldest + MINUTE).saturating_duration_since(now))
                .unwrap_or_default()
                .max(Duration::from_secs(1))
        });

        let until = now + wait;
        windows.blocked_until = Some(match windows.blocked_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });

        tracing::warn!(
            wait_ms = wait.as_millis() as u64,
            "LMS returned 429, pausing outbound requests"
        );
        wait
    }

    /// Observe the current state without taking a token
    pub async fn snapshot(&self) -> RateLimitState {
        let windows = self.windows.lock().await;
        let now = Instant::now();

        RateLimitState {
            minute: windows.minute.state(now),
            hour: windows.hour.state(now),
            blocked_until: windows
                .blocked_until
                .filter(|until| *until > now)
                .map(|until| to_wall_clock(until.saturating_duration_since(now))),
        }
    }
}

fn to_wall_clock(from_now: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(from_now).unwrap_or_else(|_| chrono::Duration::zero())
}
