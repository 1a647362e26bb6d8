//! Common domain types for rate limiting.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Decision;

/// Share of the base limit that stays admissible when a limiter fails open.
pub const FAIL_OPEN_FRACTION: f64 = 0.1;

/// Identifies who or what a request is charged to.
///
/// Produced by the host's request-identification function, typically from a
/// user id or a client IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RateLimitKey {
    /// Numeric identifier, such as a user id
    Id(u64),
    /// Textual identifier, such as an IP address or API key name
    Name(String),
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitKey::Id(id) => write!(f, "{}", id),
            RateLimitKey::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<u64> for RateLimitKey {
    fn from(id: u64) -> Self {
        RateLimitKey::Id(id)
    }
}

impl From<&str> for RateLimitKey {
    fn from(name: &str) -> Self {
        RateLimitKey::Name(name.to_string())
    }
}

impl From<String> for RateLimitKey {
    fn from(name: String) -> Self {
        RateLimitKey::Name(name)
    }
}

impl From<std::net::IpAddr> for RateLimitKey {
    fn from(addr: std::net::IpAddr) -> Self {
        RateLimitKey::Name(addr.to_string())
    }
}

/// What a limiter does when its own bookkeeping fails mid-decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Deny the request with a conservative retry hint
    #[default]
    Closed,
    /// Admit the request only while total traffic is under
    /// [`FAIL_OPEN_FRACTION`] of the base limit
    OpenThrottled,
}

impl FailurePolicy {
    /// Build the fallback decision for an internal fault.
    ///
    /// # Arguments
    ///
    /// * `limit` - Effective limit to report
    /// * `base_limit` - Configured limit the fail-open allowance is derived from
    /// * `total_requests` - Requests seen before this one
    /// * `retry_after` - Retry hint for denials
    pub fn fallback(
        &self,
        limit: u32,
        base_limit: u32,
        total_requests: u64,
        retry_after: Duration,
    ) -> Decision {
        match self {
            FailurePolicy::Closed => Decision::deny(0, retry_after, limit, retry_after),
            FailurePolicy::OpenThrottled => {
                let allowance = base_limit as f64 * FAIL_OPEN_FRACTION;
                if (total_requests as f64) < allowance {
                    Decision::allow(0, retry_after, limit)
                } else {
                    Decision::deny(0, retry_after, limit, retry_after)
                }
            }
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Closed => write!(f, "closed"),
            FailurePolicy::OpenThrottled => write!(f, "open_throttled"),
        }
    }
}
