//! Loading limiters from configuration.
//!
//! [`LimiterConfig`] selects an algorithm with an `"algorithm"` tag, so a limiter
//! can be described in a JSON document:
//!
//! ```rust
//! use adaptive_rate_limit::clock::ManualClock;
//! use adaptive_rate_limit::config::LimiterConfig;
//! use adaptive_rate_limit::rate_limit::RateLimiter;
//!
//! let config = LimiterConfig::from_json(r#"{
//!     "algorithm": "sliding_window",
//!     "window_size_ms": 60000,
//!     "max_requests": 10,
//!     "precision": 10
//! }"#).unwrap();
//!
//! let mut limiter = config.build(ManualClock::new(0).shared()).unwrap();
//! assert_eq!(limiter.algorithm(), "sliding_window");
//! assert!(limiter.consume(None, 1).unwrap().allowed());
//! ```
//!
//! Omitted fields take their defaults and all durations are in milliseconds.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::LimiterError;
use crate::rate_limit::{
    AdaptiveConfig, AdaptiveLimiter, AdaptiveState, RateLimiter, SlidingWindow,
    SlidingWindowConfig, SlidingWindowState, TokenBucket, TokenBucketConfig, TokenBucketState,
};
use crate::types::{Decision, RateLimitKey};

/// Configuration for any of the algorithms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterConfig {
    /// Token bucket
    TokenBucket(TokenBucketConfig),
    /// Sliding window
    SlidingWindow(SlidingWindowConfig),
    /// Adaptive limiter
    Adaptive(AdaptiveConfig),
}

impl LimiterConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, LimiterError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, LimiterError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check every bound of the selected algorithm.
    pub fn validate(&self) -> Result<(), LimiterError> {
        match self {
            LimiterConfig::TokenBucket(config) => config.validate(),
            LimiterConfig::SlidingWindow(config) => config.validate(),
            LimiterConfig::Adaptive(config) => config.validate(),
        }
    }

    /// Construct the configured limiter.
    pub fn build(self, clock: Arc<dyn Clock>) -> Result<Limiter, LimiterError> {
        Ok(match self {
            LimiterConfig::TokenBucket(config) => Limiter::TokenBucket(TokenBucket::new(config, clock)?),
            LimiterConfig::SlidingWindow(config) => {
                Limiter::SlidingWindow(SlidingWindow::new(config, clock)?)
            }
            LimiterConfig::Adaptive(config) => Limiter::Adaptive(AdaptiveLimiter::new(config, clock)?),
        })
    }
}

/// A limiter of any algorithm, chosen at runtime.
#[derive(Debug, Clone)]
pub enum Limiter {
    /// Token bucket
    TokenBucket(TokenBucket),
    /// Sliding window
    SlidingWindow(SlidingWindow),
    /// Adaptive limiter
    Adaptive(AdaptiveLimiter),
}

/// State snapshot of a [`Limiter`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterState {
    /// Token bucket
    TokenBucket(TokenBucketState),
    /// Sliding window
    SlidingWindow(SlidingWindowState),
    /// Adaptive limiter
    Adaptive(AdaptiveState),
}

impl Limiter {
    /// Name of the algorithm, as used in configuration.
    pub fn algorithm(&self) -> &'static str {
        match self {
            Limiter::TokenBucket(_) => "token_bucket",
            Limiter::SlidingWindow(_) => "sliding_window",
            Limiter::Adaptive(_) => "adaptive",
        }
    }

    /// Access the adaptive limiter, e.g. to record request outcomes.
    pub fn as_adaptive_mut(&mut self) -> Option<&mut AdaptiveLimiter> {
        match self {
            Limiter::Adaptive(limiter) => Some(limiter),
            _ => None,
        }
    }
}

impl RateLimiter for Limiter {
    type State = LimiterState;

    fn consume(&mut self, key: Option<&RateLimitKey>, amount: u32) -> Result<Decision, LimiterError> {
        match self {
            Limiter::TokenBucket(limiter) => limiter.consume(key, amount),
            Limiter::SlidingWindow(limiter) => limiter.consume(key, amount),
            Limiter::Adaptive(limiter) => limiter.consume(key, amount),
        }
    }

    fn can_consume(&mut self, amount: u32) -> Result<bool, LimiterError> {
        match self {
            Limiter::TokenBucket(limiter) => limiter.can_consume(amount),
            Limiter::SlidingWindow(limiter) => limiter.can_consume(amount),
            Limiter::Adaptive(limiter) => limiter.can_consume(amount),
        }
    }

    fn max_admissible(&self) -> u32 {
        match self {
            Limiter::TokenBucket(limiter) => limiter.max_admissible(),
            Limiter::SlidingWindow(limiter) => limiter.max_admissible(),
            Limiter::Adaptive(limiter) => limiter.max_admissible(),
        }
    }

    fn state(&mut self) -> LimiterState {
        match self {
            Limiter::TokenBucket(limiter) => LimiterState::TokenBucket(limiter.state()),
            Limiter::SlidingWindow(limiter) => LimiterState::SlidingWindow(limiter.state()),
            Limiter::Adaptive(limiter) => LimiterState::Adaptive(limiter.state()),
        }
    }

    fn reset(&mut self) {
        match self {
            Limiter::TokenBucket(limiter) => limiter.reset(),
            Limiter::SlidingWindow(limiter) => limiter.reset(),
            Limiter::Adaptive(limiter) => limiter.reset(),
        }
    }

    fn compact(&mut self) {
        match self {
            Limiter::TokenBucket(limiter) => limiter.compact(),
            Limiter::SlidingWindow(limiter) => limiter.compact(),
            Limiter::Adaptive(limiter) => limiter.compact(),
        }
    }
}
