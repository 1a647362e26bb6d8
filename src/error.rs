//! Error types for the rate limiting library.

use thiserror::Error;

/// The main error type for all rate limiter operations.
///
/// Being rate limited is *not* an error: `consume` returns a denied
/// [`Decision`](crate::types::Decision) for that. Errors are reserved for
/// configuration mistakes and requests that can never be satisfied.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// A configuration value is out of bounds
    #[error("Invalid configuration: `{field}` {reason}")]
    InvalidConfig {
        /// Name of the offending configuration field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Requested amount is not a positive integer
    #[error("Invalid amount: must be at least 1, got {0}")]
    InvalidAmount(u32),

    /// Requested amount can never be satisfied by this limiter
    #[error("Requested {requested} exceeds capacity {capacity}")]
    ExceedsCapacity {
        /// Amount requested by the caller
        requested: u32,
        /// Maximum amount the limiter can ever grant at once
        capacity: u32,
    },

    /// Reported latency is negative or not a number
    #[error("Invalid latency: {0}ms")]
    InvalidLatency(f64),

    /// Reported status code is outside the HTTP range
    #[error("Invalid HTTP status code: {0}")]
    InvalidStatusCode(u16),

    /// Rate limit exceeded and the caller was not willing to wait
    #[error("Rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimitExceeded {
        /// Suggested wait time in milliseconds before retrying
        retry_after_ms: u64,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LimiterError {
    /// Create a configuration error for the given field.
    pub fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    /// Check if this error was caused by invalid configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. } | Self::Json(_))
    }

    /// Check if this error reports a request that can never succeed.
    ///
    /// Retrying such a request is pointless, unlike [`LimiterError::RateLimitExceeded`].
    pub fn is_unsatisfiable(&self) -> bool {
        matches!(self, Self::InvalidAmount(_) | Self::ExceedsCapacity { .. })
    }

    /// Suggested retry delay, if this error carries one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let error = LimiterError::invalid_config("capacity", "must be greater than 0");
        assert_eq!(
            error.to_string(),
            "Invalid configuration: `capacity` must be greater than 0"
        );
        assert!(error.is_config_error());
        assert!(!error.is_unsatisfiable());
    }

    #[test]
    fn test_error_classification() {
        let error = LimiterError::ExceedsCapacity {
            requested: 11,
            capacity: 10,
        };
        assert!(error.is_unsatisfiable());
        assert_eq!(error.retry_after_ms(), None);

        let error = LimiterError::RateLimitExceeded { retry_after_ms: 250 };
        assert_eq!(error.retry_after_ms(), Some(250));
        assert_eq!(error.to_string(), "Rate limit exceeded, retry after 250ms");
    }
}
