//! Rate limiting algorithms.
//!
//! Three interchangeable algorithms share the [`RateLimiter`] contract and return a
//! uniform [`Decision`]:
//!
//! - **[`TokenBucket`]**: tokens accrue continuously at a fixed rate up to a burst cap
//! - **[`SlidingWindow`]**: requests are counted in weighted sub-windows of a moving window
//! - **[`AdaptiveLimiter`]**: a dynamic limit tuned by observed latency and success rate
//!
//! ## Example
//!
//! ```rust
//! use adaptive_rate_limit::clock::ManualClock;
//! use adaptive_rate_limit::rate_limit::{RateLimiter, TokenBucket, TokenBucketConfig};
//!
//! let clock = ManualClock::new(0);
//! let config = TokenBucketConfig::builder().capacity(10).refill_rate(1.0).build();
//! let mut bucket = TokenBucket::new(config, clock.shared()).unwrap();
//!
//! let decision = bucket.consume(None, 1).unwrap();
//! assert!(decision.allowed());
//! assert_eq!(decision.remaining(), 9);
//! ```
//!
//! ## Wrappers
//!
//! - [`KeyedLimiter`] keeps one limiter per [`RateLimitKey`]
//! - [`SharedLimiter`] serializes access from async tasks and can wait out denials
//! - [`Compactor`] runs periodic maintenance in a background task

mod adaptive;
mod compactor;
mod keyed;
mod metrics;
mod shared;
mod sliding_window;
mod token_bucket;
mod ttl_cache;

pub use adaptive::{AdaptiveConfig, AdaptiveConfigBuilder, AdaptiveLimiter, AdaptiveState, AdjustmentState};
pub use compactor::Compactor;
pub use keyed::{KeyedLimiter, KeyedState};
pub use metrics::{LatencyTrend, PerformanceMetrics, RequestOutcome, RequestSample};
pub use shared::SharedLimiter;
pub use sliding_window::{SlidingWindow, SlidingWindowConfig, SlidingWindowConfigBuilder, SlidingWindowState};
pub use token_bucket::{TokenBucket, TokenBucketConfig, TokenBucketConfigBuilder, TokenBucketState};
pub use ttl_cache::TtlCache;

use thiserror::Error;

use crate::error::LimiterError;
use crate::types::{Decision, RateLimitKey};

/// The contract shared by every rate limiting algorithm.
///
/// Implementations are plain mutable state with no internal locking; callers that
/// share a limiter across tasks must serialize access, for example through
/// [`SharedLimiter`].
pub trait RateLimiter {
    /// Snapshot type returned by [`RateLimiter::state`].
    type State;

    /// Try to admit `amount` units of work, optionally charged to `key`.
    ///
    /// Returns `Err` only for requests that can never be satisfied. Being rate
    /// limited is reported through [`Decision::allowed`].
    fn consume(&mut self, key: Option<&RateLimitKey>, amount: u32) -> Result<Decision, LimiterError>;

    /// Check whether `amount` units would be admitted right now without using quota.
    ///
    /// Time-based bookkeeping (refill, expiry) may still advance.
    fn can_consume(&mut self, amount: u32) -> Result<bool, LimiterError>;

    /// Largest amount a single call can ever be granted.
    fn max_admissible(&self) -> u32;

    /// Current state snapshot. Time-based bookkeeping is brought up to date first.
    fn state(&mut self) -> Self::State;

    /// Return to the state right after construction.
    fn reset(&mut self);

    /// Drop expired bookkeeping and correct accumulated drift.
    ///
    /// Limiters that never accumulate per-request state have nothing to do here.
    fn compact(&mut self) {}
}

/// An internal bookkeeping failure. Never surfaced to callers; it selects the
/// [`FailurePolicy`](crate::types::FailurePolicy) fallback instead.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// The clock reported a time earlier than one already observed
    #[error("clock moved backwards from {last_ms}ms to {now_ms}ms")]
    ClockRegression { last_ms: u64, now_ms: u64 },
    /// A counter or time computation overflowed
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
}

/// Reject amounts that are not positive integers.
pub(crate) fn validate_amount(amount: u32) -> Result<(), LimiterError> {
    if amount == 0 {
        Err(LimiterError::InvalidAmount(amount))
    } else {
        Ok(())
    }
}

/// Tuning constants shared by the algorithms.
pub mod limits {
    /// Token bucket constants.
    pub mod token_bucket {
        /// Fixed-point scale: one token in micro-tokens.
        pub const MICROS_PER_TOKEN: u64 = 1_000_000;
        /// Retry hint when the bucket fails closed.
        pub const FAIL_CLOSED_RETRY_MS: u64 = 1_000;
    }

    /// Sliding window constants.
    pub mod sliding_window {
        /// Narrowest sub-window considered reliable.
        pub const MIN_SUB_WINDOW_MS: u64 = 100;
        /// Default number of sub-windows.
        pub const DEFAULT_PRECISION: u32 = 10;
        /// Default period of the full running-total recount.
        pub const DEFAULT_COMPACTION_INTERVAL_MS: u64 = 300_000;
        /// Retry probing advances by one sub-window divided by this.
        pub const RETRY_PROBE_DIVISOR: u64 = 10;
    }

    /// Adaptive limiter constants.
    pub mod adaptive {
        /// Mean latency difference (ms) between sample halves treated as noise.
        pub const LATENCY_TREND_DEADBAND_MS: f64 = 50.0;
        /// Error rate above which the limit is lowered.
        pub const ERROR_RATE_THRESHOLD: f64 = 0.1;
        /// Success rate above which performance counts as excellent.
        pub const EXCELLENT_SUCCESS_RATE: f64 = 0.98;
        /// Latency, relative to target, below which performance counts as excellent.
        pub const EXCELLENT_LATENCY_RATIO: f64 = 0.5;
        /// Success rate below which performance counts as poor.
        pub const POOR_SUCCESS_RATE: f64 = 0.8;
        /// Latency, relative to target, above which performance counts as poor.
        pub const POOR_LATENCY_RATIO: f64 = 2.0;
        /// Latency, relative to target, above which the limit is lowered.
        pub const HIGH_LATENCY_RATIO: f64 = 1.5;
        /// Multiplier applied to increases right after a decrease.
        pub const REBOUND_DAMPING: f64 = 0.5;
        /// Multiplier applied to decreases once the streak is long enough.
        pub const BACKOFF_ACCELERATION: f64 = 1.5;
        /// Default number of prior consecutive decreases before acceleration applies.
        pub const DEFAULT_BACKOFF_ACCELERATION_AFTER: u32 = 2;
        /// Default bound on retained outcome samples.
        pub const DEFAULT_MAX_SAMPLES: usize = 1_000;
        /// Default bound on tracked keys.
        pub const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;
    }
}
