//! Token bucket rate limiting with continuous refill.
//!
//! Tokens accrue at `refill_rate` per second, computed from the clock delta since
//! the last refill rather than from a fixed tick, so idle periods and irregular
//! call intervals are accounted exactly. Tokens are stored as integer
//! micro-tokens and clamped after every update, so repeated arithmetic cannot
//! drift below zero or above the burst ceiling. The fraction of a micro-token
//! left over by each refill is carried into the next one.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::LimiterError;
use crate::rate_limit::limits::token_bucket::{FAIL_CLOSED_RETRY_MS, MICROS_PER_TOKEN};
use crate::rate_limit::{Fault, RateLimiter, validate_amount};
use crate::types::{Decision, FailurePolicy, RateLimitKey};

/// Token bucket configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBucketConfig {
    /// Maximum number of tokens the bucket can hold.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Tokens available right after construction (defaults to full).
    pub initial_tokens: Option<u32>,
    /// Largest amount that may be taken at once; also caps refill (defaults to capacity).
    pub max_burst: Option<u32>,
    /// Behavior on internal faults.
    pub failure_policy: FailurePolicy,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_rate: 10.0,
            initial_tokens: None,
            max_burst: None,
            failure_policy: FailurePolicy::Closed,
        }
    }
}

impl TokenBucketConfig {
    /// Create a new configuration builder.
    pub fn builder() -> TokenBucketConfigBuilder {
        TokenBucketConfigBuilder::new()
    }

    /// Check every bound. Called by [`TokenBucket::new`].
    pub fn validate(&self) -> Result<(), LimiterError> {
        if self.capacity == 0 {
            return Err(LimiterError::invalid_config("capacity", "must be greater than 0"));
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(LimiterError::invalid_config(
                "refill_rate",
                format!("must be a positive finite number, got {}", self.refill_rate),
            ));
        }
        if let Some(initial) = self.initial_tokens {
            if initial > self.capacity {
                return Err(LimiterError::invalid_config(
                    "initial_tokens",
                    format!("{} exceeds capacity {}", initial, self.capacity),
                ));
            }
        }
        if let Some(burst) = self.max_burst {
            if burst == 0 {
                return Err(LimiterError::invalid_config("max_burst", "must be greater than 0"));
            }
            if burst > self.capacity {
                return Err(LimiterError::invalid_config(
                    "max_burst",
                    format!("{} exceeds capacity {}", burst, self.capacity),
                ));
            }
        }
        Ok(())
    }

    /// Effective burst cap.
    pub fn effective_max_burst(&self) -> u32 {
        self.max_burst.unwrap_or(self.capacity)
    }
}

/// Builder for [`TokenBucketConfig`].
#[derive(Debug, Clone, Default)]
pub struct TokenBucketConfigBuilder {
    config: TokenBucketConfig,
}

impl TokenBucketConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: TokenBucketConfig::default(),
        }
    }

    /// Set the bucket capacity.
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set the refill rate in tokens per second.
    pub fn refill_rate(mut self, tokens_per_sec: f64) -> Self {
        self.config.refill_rate = tokens_per_sec;
        self
    }

    /// Set the number of tokens available at start.
    pub fn initial_tokens(mut self, tokens: u32) -> Self {
        self.config.initial_tokens = Some(tokens);
        self
    }

    /// Set the burst cap.
    pub fn max_burst(mut self, burst: u32) -> Self {
        self.config.max_burst = Some(burst);
        self
    }

    /// Set the failure policy.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TokenBucketConfig {
        self.config
    }
}

/// Snapshot of a token bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenBucketState {
    /// Tokens currently available.
    pub tokens: f64,
    /// Configured capacity.
    pub capacity: u32,
    /// Effective burst cap.
    pub max_burst: u32,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Share of the burst cap currently in use, in percent.
    pub utilization_percent: f64,
    /// Calls to `consume` since construction or reset.
    pub total_requests: u64,
    /// Calls that were denied.
    pub rejected_requests: u64,
}

/// A token bucket rate limiter.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use adaptive_rate_limit::clock::ManualClock;
/// use adaptive_rate_limit::rate_limit::{RateLimiter, TokenBucket, TokenBucketConfig};
///
/// let clock = ManualClock::new(0);
/// let config = TokenBucketConfig::builder().capacity(2).refill_rate(1.0).build();
/// let mut bucket = TokenBucket::new(config, clock.shared()).unwrap();
///
/// assert!(bucket.consume(None, 2).unwrap().allowed());
///
/// let denied = bucket.consume(None, 1).unwrap();
/// assert_eq!(denied.retry_after(), Duration::from_secs(1));
///
/// clock.advance(Duration::from_secs(1));
/// assert!(bucket.consume(None, 1).unwrap().allowed());
/// ```
#[derive(Debug, Clone)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    /// Refill ceiling, min(capacity, max_burst), in micro-tokens
    ceiling: u64,
    /// Starting fill in micro-tokens
    initial: u64,
    /// Refill rate in micro-tokens per millisecond
    micros_per_ms: f64,
    /// Current fill in micro-tokens
    tokens: u64,
    /// Fraction of a micro-token accrued but not yet added
    carry: f64,
    last_refill: u64,
    total_requests: u64,
    rejected_requests: u64,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Create a new token bucket. The configuration is validated first.
    pub fn new(config: TokenBucketConfig, clock: Arc<dyn Clock>) -> Result<Self, LimiterError> {
        config.validate()?;

        let ceiling = config.effective_max_burst() as u64 * MICROS_PER_TOKEN;
        let initial = (config.initial_tokens.unwrap_or(config.capacity) as u64 * MICROS_PER_TOKEN)
            .min(ceiling);
        let micros_per_ms = config.refill_rate * MICROS_PER_TOKEN as f64 / 1000.0;
        let now = clock.now_ms();

        Ok(Self {
            config,
            ceiling,
            initial,
            micros_per_ms,
            tokens: initial,
            carry: 0.0,
            last_refill: now,
            total_requests: 0,
            rejected_requests: 0,
            clock,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    /// Tokens available right now, after refill.
    pub fn available_tokens(&mut self) -> f64 {
        let now = self.clock.now_ms();
        if let Err(fault) = self.refill(now) {
            tracing::warn!(%fault, "Token bucket refill failed");
        }
        self.tokens as f64 / MICROS_PER_TOKEN as f64
    }

    /// Add tokens for the time elapsed since the last refill.
    fn refill(&mut self, now: u64) -> Result<(), Fault> {
        if now < self.last_refill {
            return Err(Fault::ClockRegression {
                last_ms: self.last_refill,
                now_ms: now,
            });
        }

        let elapsed = now - self.last_refill;
        if elapsed == 0 {
            return Ok(());
        }
        self.last_refill = now;
        if self.tokens >= self.ceiling {
            self.carry = 0.0;
            return Ok(());
        }

        let accrued = elapsed as f64 * self.micros_per_ms + self.carry;
        if !accrued.is_finite() {
            return Err(Fault::Overflow("token refill"));
        }
        let added = accrued.floor();
        self.carry = accrued - added;

        self.tokens = self.tokens.saturating_add(added as u64);
        if self.tokens >= self.ceiling {
            self.tokens = self.ceiling;
            self.carry = 0.0;
        }
        Ok(())
    }

    /// Milliseconds needed to accrue `micros` micro-tokens.
    fn time_to_accrue(&self, micros: u64) -> Duration {
        if micros == 0 {
            return Duration::ZERO;
        }
        let ms = (micros as f64 / self.micros_per_ms).ceil();
        Duration::from_millis(ms as u64)
    }

    fn time_to_full(&self) -> Duration {
        self.time_to_accrue(self.ceiling.saturating_sub(self.tokens))
    }

    fn remaining(&self) -> u32 {
        (self.tokens / MICROS_PER_TOKEN) as u32
    }

    fn try_consume(&mut self, tokens: u32, now: u64) -> Result<Decision, Fault> {
        self.refill(now)?;

        let capacity = self.config.capacity;
        let requested = (tokens as u64)
            .checked_mul(MICROS_PER_TOKEN)
            .ok_or(Fault::Overflow("token request"))?;

        if tokens > self.config.effective_max_burst() {
            // Never satisfiable in one call; hint no longer than an empty-to-full refill.
            let retry_after = self
                .time_to_accrue(requested)
                .min(self.time_to_accrue(self.ceiling));
            return Ok(Decision::deny(
                self.remaining(),
                self.time_to_full(),
                capacity,
                retry_after,
            ));
        }

        if requested <= self.tokens {
            self.tokens = self.tokens.saturating_sub(requested);
            Ok(Decision::allow(self.remaining(), self.time_to_full(), capacity))
        } else {
            let retry_after = self.time_to_accrue(requested - self.tokens);
            Ok(Decision::deny(
                self.remaining(),
                self.time_to_full(),
                capacity,
                retry_after,
            ))
        }
    }
}

impl RateLimiter for TokenBucket {
    type State = TokenBucketState;

    fn consume(&mut self, _key: Option<&RateLimitKey>, tokens: u32) -> Result<Decision, LimiterError> {
        validate_amount(tokens)?;
        if tokens > self.config.capacity {
            return Err(LimiterError::ExceedsCapacity {
                requested: tokens,
                capacity: self.config.capacity,
            });
        }

        let now = self.clock.now_ms();
        let seen = self.total_requests;
        self.total_requests = self.total_requests.saturating_add(1);

        let decision = match self.try_consume(tokens, now) {
            Ok(decision) => decision,
            Err(fault) => {
                let policy = self.config.failure_policy;
                tracing::warn!(%fault, %policy, "Token bucket fault, applying failure policy");
                policy.fallback(
                    self.config.capacity,
                    self.config.capacity,
                    seen,
                    Duration::from_millis(FAIL_CLOSED_RETRY_MS),
                )
            }
        };

        if !decision.allowed() {
            self.rejected_requests = self.rejected_requests.saturating_add(1);
            tracing::trace!(
                tokens,
                retry_after_ms = decision.retry_after_ms(),
                "Token bucket denied request"
            );
        }
        Ok(decision)
    }

    fn can_consume(&mut self, tokens: u32) -> Result<bool, LimiterError> {
        validate_amount(tokens)?;
        if tokens > self.config.capacity {
            return Err(LimiterError::ExceedsCapacity {
                requested: tokens,
                capacity: self.config.capacity,
            });
        }

        let now = self.clock.now_ms();
        if self.refill(now).is_err() {
            return Ok(false);
        }
        Ok(tokens <= self.config.effective_max_burst()
            && tokens as u64 * MICROS_PER_TOKEN <= self.tokens)
    }

    fn max_admissible(&self) -> u32 {
        self.config.effective_max_burst()
    }

    fn state(&mut self) -> TokenBucketState {
        let tokens = self.available_tokens();
        let used = self.ceiling.saturating_sub(self.tokens) as f64;

        TokenBucketState {
            tokens,
            capacity: self.config.capacity,
            max_burst: self.config.effective_max_burst(),
            refill_rate: self.config.refill_rate,
            utilization_percent: used / self.ceiling as f64 * 100.0,
            total_requests: self.total_requests,
            rejected_requests: self.rejected_requests,
        }
    }

    fn reset(&mut self) {
        self.tokens = self.initial;
        self.carry = 0.0;
        self.last_refill = self.clock.now_ms();
        self.total_requests = 0;
        self.rejected_requests = 0;
    }
}
