//! Rate limit bucket
//!
//! Tracks the remaining call budget and reset time for one routing key. The same type
//! backs REST per-route limits and the gateway session-start limit.

use super::RateLimitHeaders;
use std::time::Duration;
use tokio::time::Instant;

/// Extra delay applied to reaction routes, whose server-side reset lags the headers
pub const REACTION_RESET_PADDING: Duration = Duration::from_millis(250);

/// Remaining budget and reset time for one routing key
#[derive(Debug, Clone)]
pub struct RateBucket {
    key: String,
    limit: Option<u32>,
    /// `None` until the first response for this key has been observed
    remaining: Option<u32>,
    reset_at: Option<Instant>,
}

impl RateBucket {
    /// Create an empty bucket; it never waits until a response has been observed
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            limit: None,
            remaining: None,
            reset_at: None,
        }
    }

    /// Create a bucket with a known budget, e.g. from a session start limit
    pub fn with_budget(
        key: impl Into<String>,
        limit: u32,
        remaining: u32,
        reset_after: Duration,
        now: Instant,
    ) -> Self {
        Self {
            key: key.into(),
            limit: Some(limit),
            remaining: Some(remaining),
            reset_at: Some(now + reset_after),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn reset_at(&self) -> Option<Instant> {
        self.reset_at
    }

    /// Whether this key belongs to the reaction route class
    pub fn is_reaction_route(&self) -> bool {
        self.key.contains("/reactions")
    }

    /// Update the bucket from a response's headers
    pub fn observe(&mut self, headers: &RateLimitHeaders, now: Instant) {
        if let Some(limit) = headers.limit {
            self.limit = Some(limit);
        }
        if let Some(remaining) = headers.remaining {
            self.remaining = Some(remaining);
        }

        if self.is_reaction_route() && headers.remaining.is_some() {
            self.reset_at = Some(now + REACTION_RESET_PADDING);
        } else if let Some(after) = headers.time_until_reset() {
            self.reset_at = Some(now + after);
        }

        // A 429 carries the authoritative wait; the window is exhausted until it passes
        if let Some(retry_after) = headers.retry_after {
            if !headers.global {
                self.remaining = Some(0);
                self.reset_at = Some(now + retry_after);
            }
        }

        tracing::trace!(
            bucket = %self.key,
            limit = ?self.limit,
            remaining = ?self.remaining,
            "Rate limit bucket updated"
        );
    }

    /// True iff the budget is exhausted and the window has not reset yet
    pub fn should_wait(&self, now: Instant) -> bool {
        matches!(self.remaining, Some(0)) && self.reset_at.is_some_and(|reset| now < reset)
    }

    /// How long a caller must sleep before dispatching, if at all
    pub fn wait_time(&self, now: Instant) -> Option<Duration> {
        if self.should_wait(now) {
            self.reset_at.map(|reset| reset - now)
        } else {
            None
        }
    }

    /// Calls that may go out now without waiting; `None` when the budget is unknown
    pub fn available(&self, now: Instant) -> Option<u32> {
        if self.reset_at.is_some_and(|reset| now >= reset) {
            return self.limit.or(self.remaining);
        }
        self.remaining
    }

    /// Take one call from the budget
    ///
    /// Once the window has passed the budget refills to `limit` before the call is taken.
    pub fn consume(&mut self, now: Instant) {
        if self.reset_at.is_some_and(|reset| now >= reset) {
            if let Some(limit) = self.limit {
                self.remaining = Some(limit);
            }
            self.reset_at = None;
        }

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }

    /// Replace the budget wholesale, e.g. after refetching a session start limit
    pub fn reset_budget(&mut self, limit: u32, remaining: u32, reset_after: Duration, now: Instant) {
        self.limit = Some(limit);
        self.remaining = Some(remaining);
        self.reset_at = Some(now + reset_after);
    }
}
