//! Rate limit response headers
//!
//! Parsed independently of any HTTP library: callers supply a header lookup function.

use chrono::{DateTime, Utc};
use std::time::Duration;

pub const LIMIT: &str = "x-ratelimit-limit";
pub const REMAINING: &str = "x-ratelimit-remaining";
pub const RESET: &str = "x-ratelimit-reset";
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const GLOBAL: &str = "x-ratelimit-global";
pub const SCOPE: &str = "x-ratelimit-scope";
pub const BUCKET: &str = "x-ratelimit-bucket";
pub const RETRY_AFTER: &str = "retry-after";
pub const DATE: &str = "date";

/// Rate limit information carried by a single response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Total calls allowed per window
    pub limit: Option<u32>,
    /// Calls left in the current window
    pub remaining: Option<u32>,
    /// Absolute reset time as Unix epoch seconds (server clock)
    pub reset: Option<f64>,
    /// Time until the window resets
    pub reset_after: Option<Duration>,
    /// `retry-after`, present on 429 responses
    pub retry_after: Option<Duration>,
    /// Whether the limit hit is the process-wide global limit
    pub global: bool,
    /// `user`, `global` or `shared`
    pub scope: Option<String>,
    /// Opaque bucket hash assigned by the server
    pub bucket: Option<String>,
    /// Server clock from the `Date` header
    pub server_date: Option<DateTime<Utc>>,
}

impl RateLimitHeaders {
    /// Parse rate limit headers through a case-insensitive lookup function
    pub fn from_lookup<'a, F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        Self {
            limit: lookup(LIMIT).and_then(|v| v.trim().parse().ok()),
            remaining: lookup(REMAINING).and_then(|v| v.trim().parse().ok()),
            reset: lookup(RESET).and_then(|v| v.trim().parse().ok()),
            reset_after: lookup(RESET_AFTER).and_then(parse_seconds),
            retry_after: lookup(RETRY_AFTER).and_then(parse_seconds),
            global: lookup(GLOBAL).is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
            scope: lookup(SCOPE).map(str::to_string),
            bucket: lookup(BUCKET).map(str::to_string),
            server_date: lookup(DATE).and_then(parse_http_date),
        }
    }

    /// Whether the response carried any rate limit information at all
    pub fn is_empty(&self) -> bool {
        self.limit.is_none()
            && self.remaining.is_none()
            && self.reset.is_none()
            && self.reset_after.is_none()
            && self.retry_after.is_none()
    }

    /// Time until reset, preferring the relative header
    ///
    /// The absolute `reset` is measured against the server's `Date` header rather than the
    /// local clock, so local clock skew does not stretch or shrink the window.
    pub fn time_until_reset(&self) -> Option<Duration> {
        if let Some(after) = self.reset_after {
            return Some(after);
        }

        let reset = self.reset?;
        let server_now = self.server_date.unwrap_or_else(Utc::now);
        let server_now_secs = server_now.timestamp_millis() as f64 / 1000.0;
        Some(Duration::from_secs_f64((reset - server_now_secs).max(0.0)))
    }
}

fn parse_seconds(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// Parse an IMF-fixdate (`Wed, 21 Oct 2015 07:28:00 GMT`)
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
