//! Sliding window rate limiting with weighted sub-windows.
//!
//! The window is split into `precision` sub-windows of equal width. A request is
//! counted in the sub-window its timestamp falls into. Usage is the sum of the
//! sub-windows inside the window, plus the oldest sub-window weighted by the share
//! of it that still overlaps the window:
//!
//! ```text
//!            oldest (partial)                     current
//!          |---x---|-------|-------| ... |-------|---o---|
//!              ^ now - window                        ^ now
//! usage = count[oldest] * (1 - elapsed/sub) + sum(count[oldest+1 ..= current])
//! ```
//!
//! This spreads the boundary sub-window's expiry over its width instead of
//! dropping it at once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::LimiterError;
use crate::rate_limit::limits::sliding_window::{
    DEFAULT_COMPACTION_INTERVAL_MS, DEFAULT_PRECISION, MIN_SUB_WINDOW_MS, RETRY_PROBE_DIVISOR,
};
use crate::rate_limit::{Fault, RateLimiter, validate_amount};
use crate::types::serde_helpers::{duration_ms, option_duration_ms};
use crate::types::{Decision, FailurePolicy, RateLimitKey};

/// Sliding window configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlidingWindowConfig {
    /// Width of the moving window.
    #[serde(rename = "window_size_ms", with = "duration_ms")]
    pub window_size: Duration,
    /// Requests allowed per window.
    pub max_requests: u32,
    /// Number of sub-windows. Must divide the window evenly, and each must be
    /// at least 100ms wide.
    pub precision: u32,
    /// Period of the full running-total recount done inline by `consume`.
    /// `None` leaves it to [`compact`](RateLimiter::compact), e.g. from a
    /// [`Compactor`](crate::rate_limit::Compactor).
    #[serde(rename = "compaction_interval_ms", with = "option_duration_ms")]
    pub compaction_interval: Option<Duration>,
    /// Behavior on internal faults.
    pub failure_policy: FailurePolicy,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            window_size: Duration::from_secs(60),
            max_requests: 100,
            precision: DEFAULT_PRECISION,
            compaction_interval: Some(Duration::from_millis(DEFAULT_COMPACTION_INTERVAL_MS)),
            failure_policy: FailurePolicy::Closed,
        }
    }
}

impl SlidingWindowConfig {
    /// Create a new configuration builder.
    pub fn builder() -> SlidingWindowConfigBuilder {
        SlidingWindowConfigBuilder::new()
    }

    /// Check every bound. Called by [`SlidingWindow::new`].
    pub fn validate(&self) -> Result<(), LimiterError> {
        let window_ms = self.window_size.as_millis() as u64;
        if window_ms == 0 {
            return Err(LimiterError::invalid_config("window_size", "must be greater than 0"));
        }
        if self.max_requests == 0 {
            return Err(LimiterError::invalid_config("max_requests", "must be greater than 0"));
        }
        if self.precision == 0 {
            return Err(LimiterError::invalid_config("precision", "must be greater than 0"));
        }
        if window_ms % self.precision as u64 != 0 {
            return Err(LimiterError::invalid_config(
                "precision",
                format!("must divide the {}ms window evenly", window_ms),
            ));
        }
        let sub_window_ms = window_ms / self.precision as u64;
        if sub_window_ms < MIN_SUB_WINDOW_MS {
            return Err(LimiterError::invalid_config(
                "precision",
                format!(
                    "gives {}ms sub-windows, minimum is {}ms",
                    sub_window_ms, MIN_SUB_WINDOW_MS
                ),
            ));
        }
        if self.compaction_interval.is_some_and(|i| i.is_zero()) {
            return Err(LimiterError::invalid_config(
                "compaction_interval",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Builder for [`SlidingWindowConfig`].
#[derive(Debug, Clone, Default)]
pub struct SlidingWindowConfigBuilder {
    config: SlidingWindowConfig,
}

impl SlidingWindowConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: SlidingWindowConfig::default(),
        }
    }

    /// Set the window width.
    pub fn window_size(mut self, window: Duration) -> Self {
        self.config.window_size = window;
        self
    }

    /// Set the requests allowed per window.
    pub fn max_requests(mut self, max: u32) -> Self {
        self.config.max_requests = max;
        self
    }

    /// Set the number of sub-windows.
    pub fn precision(mut self, precision: u32) -> Self {
        self.config.precision = precision;
        self
    }

    /// Set or disable the inline recount period.
    pub fn compaction_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.compaction_interval = interval;
        self
    }

    /// Set the failure policy.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SlidingWindowConfig {
        self.config
    }
}

/// Snapshot of a sliding window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlidingWindowState {
    /// Weighted request count inside the window.
    pub usage: f64,
    /// Requests allowed per window.
    pub max_requests: u32,
    /// Window width in milliseconds.
    pub window_size_ms: u64,
    /// Number of sub-windows.
    pub precision: u32,
    /// Width of one sub-window in milliseconds.
    pub sub_window_ms: u64,
    /// Sub-windows currently holding counts.
    pub active_sub_windows: usize,
    /// Usage as a share of `max_requests`, in percent.
    pub utilization_percent: f64,
    /// Calls to `consume` since construction or reset.
    pub total_requests: u64,
    /// Calls that were denied.
    pub rejected_requests: u64,
}

/// A sliding window rate limiter.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use adaptive_rate_limit::clock::ManualClock;
/// use adaptive_rate_limit::rate_limit::{RateLimiter, SlidingWindow, SlidingWindowConfig};
///
/// let clock = ManualClock::new(0);
/// let config = SlidingWindowConfig::builder()
///     .window_size(Duration::from_secs(60))
///     .max_requests(10)
///     .precision(10)
///     .build();
/// let mut window = SlidingWindow::new(config, clock.shared()).unwrap();
///
/// for _ in 0..10 {
///     assert!(window.consume(None, 1).unwrap().allowed());
/// }
/// assert!(!window.consume(None, 1).unwrap().allowed());
/// ```
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    config: SlidingWindowConfig,
    sub_window_ms: u64,
    precision: u64,
    /// Request count per sub-window index
    buckets: BTreeMap<u64, u32>,
    /// Sum of all counts in `buckets`
    total: u64,
    last_seen: u64,
    last_compaction: u64,
    total_requests: u64,
    rejected_requests: u64,
    clock: Arc<dyn Clock>,
}

impl SlidingWindow {
    /// Create a new sliding window. The configuration is validated first.
    pub fn new(config: SlidingWindowConfig, clock: Arc<dyn Clock>) -> Result<Self, LimiterError> {
        config.validate()?;

        let precision = config.precision as u64;
        let sub_window_ms = config.window_size.as_millis() as u64 / precision;
        let now = clock.now_ms();

        Ok(Self {
            config,
            sub_window_ms,
            precision,
            buckets: BTreeMap::new(),
            total: 0,
            last_seen: now,
            last_compaction: now,
            total_requests: 0,
            rejected_requests: 0,
            clock,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &SlidingWindowConfig {
        &self.config
    }

    fn window_ms(&self) -> u64 {
        self.sub_window_ms * self.precision
    }

    fn index(&self, t: u64) -> u64 {
        t / self.sub_window_ms
    }

    /// Share of the sub-window containing `t` that has elapsed.
    fn elapsed_fraction(&self, t: u64) -> f64 {
        (t % self.sub_window_ms) as f64 / self.sub_window_ms as f64
    }

    /// Drop sub-windows that no longer overlap the window ending in sub-window `current`.
    fn purge(&mut self, current: u64) {
        let Some(cutoff) = current.checked_sub(self.precision) else {
            return;
        };
        let kept = self.buckets.split_off(&cutoff);
        let expired = std::mem::replace(&mut self.buckets, kept);
        let dropped: u64 = expired.values().map(|&c| c as u64).sum();
        self.total = self.total.saturating_sub(dropped);
    }

    /// Weighted usage at `now`, from the running total. Requires a prior `purge`.
    fn current_usage(&self, now: u64) -> f64 {
        let current = self.index(now);
        let partial = current
            .checked_sub(self.precision)
            .and_then(|oldest| self.buckets.get(&oldest))
            .map_or(0.0, |&count| count as f64 * self.elapsed_fraction(now));
        (self.total as f64 - partial).max(0.0)
    }

    /// Weighted usage the recorded counts would produce at `t`, without mutating.
    fn projected_usage(&self, t: u64) -> f64 {
        let current = self.index(t);
        match current.checked_sub(self.precision) {
            Some(oldest) => {
                let partial = self
                    .buckets
                    .get(&oldest)
                    .map_or(0.0, |&count| count as f64 * (1.0 - self.elapsed_fraction(t)));
                let full: u64 = self
                    .buckets
                    .range(oldest + 1..=current)
                    .map(|(_, &c)| c as u64)
                    .sum();
                full as f64 + partial
            }
            None => self
                .buckets
                .range(..=current)
                .map(|(_, &c)| c as u64)
                .sum::<u64>() as f64,
        }
    }

    /// Time until every recorded request has left the window.
    fn reset_time(&self, now: u64) -> Duration {
        match self.buckets.keys().next_back() {
            Some(&newest) => {
                let clear_at = (newest + self.precision + 1).saturating_mul(self.sub_window_ms);
                Duration::from_millis(clear_at.saturating_sub(now))
            }
            None => Duration::ZERO,
        }
    }

    /// Probe forward until the request would fit, capped at one window.
    fn retry_after(&self, now: u64, requests: u32) -> Duration {
        let step = (self.sub_window_ms / RETRY_PROBE_DIVISOR).max(1);
        let max = self.config.max_requests as f64;
        let horizon = now.saturating_add(self.window_ms());

        let mut t = now.saturating_add(step);
        while t <= horizon {
            if self.projected_usage(t) + requests as f64 <= max {
                return Duration::from_millis(t - now);
            }
            t = t.saturating_add(step);
        }
        self.reset_time(now)
    }

    fn remaining_after(&self, usage: f64) -> u32 {
        (self.config.max_requests as f64 - usage).floor().max(0.0) as u32
    }

    /// Recount the running total from the buckets.
    fn recount(&mut self, now: u64) {
        let recounted: u64 = self.buckets.values().map(|&c| c as u64).sum();
        if recounted != self.total {
            tracing::debug!(
                running = self.total,
                recounted,
                "Sliding window running total corrected"
            );
        }
        self.total = recounted;
        self.last_compaction = now;
    }

    fn try_consume(&mut self, requests: u32, now: u64) -> Result<Decision, Fault> {
        if now < self.last_seen {
            return Err(Fault::ClockRegression {
                last_ms: self.last_seen,
                now_ms: now,
            });
        }
        self.last_seen = now;

        let current = self.index(now);
        self.purge(current);
        if let Some(interval) = self.config.compaction_interval {
            if now.saturating_sub(self.last_compaction) >= interval.as_millis() as u64 {
                self.recount(now);
            }
        }

        let max = self.config.max_requests;
        let usage = self.current_usage(now);

        if usage + requests as f64 <= max as f64 {
            let slot = self.buckets.entry(current).or_insert(0);
            let before = *slot;
            *slot = before.saturating_add(requests).min(max);
            let added = (*slot - before) as u64;
            self.total = self
                .total
                .checked_add(added)
                .ok_or(Fault::Overflow("sliding window total"))?;

            Ok(Decision::allow(
                self.remaining_after(usage + requests as f64),
                self.reset_time(now),
                max,
            ))
        } else {
            Ok(Decision::deny(
                self.remaining_after(usage),
                self.reset_time(now),
                max,
                self.retry_after(now, requests),
            ))
        }
    }

    fn check_amount(&self, requests: u32) -> Result<(), LimiterError> {
        validate_amount(requests)?;
        if requests > self.config.max_requests {
            return Err(LimiterError::ExceedsCapacity {
                requested: requests,
                capacity: self.config.max_requests,
            });
        }
        Ok(())
    }
}

impl RateLimiter for SlidingWindow {
    type State = SlidingWindowState;

    fn consume(&mut self, _key: Option<&RateLimitKey>, requests: u32) -> Result<Decision, LimiterError> {
        self.check_amount(requests)?;

        let now = self.clock.now_ms();
        let seen = self.total_requests;
        self.total_requests = self.total_requests.saturating_add(1);

        let decision = match self.try_consume(requests, now) {
            Ok(decision) => decision,
            Err(fault) => {
                let policy = self.config.failure_policy;
                tracing::warn!(%fault, %policy, "Sliding window fault, applying failure policy");
                let max = self.config.max_requests;
                policy.fallback(max, max, seen, Duration::from_millis(self.window_ms()))
            }
        };

        if !decision.allowed() {
            self.rejected_requests = self.rejected_requests.saturating_add(1);
            tracing::trace!(
                requests,
                retry_after_ms = decision.retry_after_ms(),
                "Sliding window denied request"
            );
        }
        Ok(decision)
    }

    fn can_consume(&mut self, requests: u32) -> Result<bool, LimiterError> {
        self.check_amount(requests)?;

        let now = self.clock.now_ms();
        if now < self.last_seen {
            return Ok(false);
        }
        self.purge(self.index(now));
        Ok(self.current_usage(now) + requests as f64 <= self.config.max_requests as f64)
    }

    fn max_admissible(&self) -> u32 {
        self.config.max_requests
    }

    fn state(&mut self) -> SlidingWindowState {
        let now = self.clock.now_ms();
        if now >= self.last_seen {
            self.purge(self.index(now));
        }
        let usage = self.projected_usage(now);
        let max = self.config.max_requests;

        SlidingWindowState {
            usage,
            max_requests: max,
            window_size_ms: self.window_ms(),
            precision: self.config.precision,
            sub_window_ms: self.sub_window_ms,
            active_sub_windows: self.buckets.len(),
            utilization_percent: usage / max as f64 * 100.0,
            total_requests: self.total_requests,
            rejected_requests: self.rejected_requests,
        }
    }

    fn reset(&mut self) {
        let now = self.clock.now_ms();
        self.buckets.clear();
        self.total = 0;
        self.last_seen = now;
        self.last_compaction = now;
        self.total_requests = 0;
        self.rejected_requests = 0;
    }

    fn compact(&mut self) {
        let now = self.clock.now_ms();
        if now < self.last_seen {
            // Keep the previous stamp; the next consume reports the regression.
            self.recount(self.last_compaction);
            return;
        }
        self.purge(self.index(now));
        self.recount(now);
    }
}
