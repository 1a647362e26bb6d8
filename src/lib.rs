//! # Adaptive Rate Limit
//!
//! Admission control for services that need to protect themselves or a
//! downstream dependency from overload.
//!
//! ## Features
//!
//! - Token bucket with continuous refill and a burst cap
//! - Sliding window with weighted sub-windows and periodic compaction
//! - Adaptive limiter that tunes its own limit from latency and success-rate feedback
//! - One [`Decision`] shape for every algorithm, with a retry hint on denial
//! - Per-key limiting with bounded memory, an async shared handle and a background compactor
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use adaptive_rate_limit::clock::MonotonicClock;
//! use adaptive_rate_limit::rate_limit::{AdaptiveConfig, AdaptiveLimiter, RateLimiter};
//!
//! let config = AdaptiveConfig::builder()
//!     .max_requests(100)
//!     .limits(10, 500)
//!     .target_latency_ms(250.0)
//!     .measurement_window(Duration::from_secs(30))
//!     .build();
//! let mut limiter = AdaptiveLimiter::new(config, MonotonicClock::shared()).unwrap();
//!
//! let decision = limiter.consume(Some(&"user-42".into()), 1).unwrap();
//! if decision.allowed() {
//!     // ... do the work, then report how it went
//!     limiter.record_request(true, 180.0, None, Some(200)).unwrap();
//! } else {
//!     println!("retry in {}ms", decision.retry_after_ms());
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod types;

// Re-export commonly used types at crate root
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{Limiter, LimiterConfig};
pub use error::LimiterError;
pub use rate_limit::RateLimiter;
pub use types::{Decision, FailurePolicy, RateLimitKey};

/// Result type alias using LimiterError
pub type Result<T> = std::result::Result<T, LimiterError>;
