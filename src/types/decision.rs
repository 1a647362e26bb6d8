//! The decision record returned by every limiter.

use std::time::Duration;

use serde::Serialize;

use crate::error::LimiterError;
use crate::types::serde_helpers::duration_ms;

/// Outcome of a single admission check.
///
/// Constructed only through [`Decision::allow`] and [`Decision::deny`], which keep
/// `remaining <= limit` and guarantee that an allowed decision never carries a
/// retry hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    allowed: bool,
    remaining: u32,
    #[serde(rename = "reset_time_ms", with = "duration_ms")]
    reset_time: Duration,
    limit: u32,
    #[serde(rename = "retry_after_ms", with = "duration_ms")]
    retry_after: Duration,
}

impl Decision {
    /// An admitted request.
    pub fn allow(remaining: u32, reset_time: Duration, limit: u32) -> Self {
        Self {
            allowed: true,
            remaining: remaining.min(limit),
            reset_time,
            limit,
            retry_after: Duration::ZERO,
        }
    }

    /// A rejected request with a hint for when to retry.
    pub fn deny(remaining: u32, reset_time: Duration, limit: u32, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: remaining.min(limit),
            reset_time,
            limit,
            retry_after,
        }
    }

    /// Whether the request may proceed.
    pub fn allowed(&self) -> bool {
        self.allowed
    }

    /// Quota left after this decision.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Time until the limiter is fully available again.
    pub fn reset_time(&self) -> Duration {
        self.reset_time
    }

    /// Effective limit at the time of the decision.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// How long to wait before retrying. Zero when allowed.
    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }

    /// Retry hint rounded up to whole milliseconds.
    pub fn retry_after_ms(&self) -> u64 {
        ceil_ms(self.retry_after)
    }

    /// Reset time rounded up to whole milliseconds.
    pub fn reset_time_ms(&self) -> u64 {
        ceil_ms(self.reset_time)
    }

    /// Convert a denial into [`LimiterError::RateLimitExceeded`].
    pub fn into_result(self) -> Result<Self, LimiterError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(LimiterError::RateLimitExceeded {
                retry_after_ms: self.retry_after_ms(),
            })
        }
    }

    /// Conventional rate limit response headers for this decision.
    ///
    /// `Retry-After` is expressed in whole seconds, rounded up, and only present on denials.
    pub fn header_values(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_time_ms().div_ceil(1000).to_string()),
        ];
        if !self.allowed {
            headers.push(("Retry-After", self.retry_after_ms().div_ceil(1000).to_string()));
        }
        headers
    }
}

fn ceil_ms(duration: Duration) -> u64 {
    let ms = duration.as_millis() as u64;
    if duration.subsec_nanos() % 1_000_000 != 0 {
        ms + 1
    } else {
        ms
    }
}
