//! Adaptive rate limiting driven by observed request outcomes.
//!
//! The limiter admits work against a dynamic limit over a rolling window. Callers
//! report how each piece of guarded work went with
//! [`record_request`](AdaptiveLimiter::record_request), and once per measurement
//! window a control loop raises the limit while the downstream is healthy and
//! lowers it when success rate or latency degrade.
//!
//! Moves are damped against oscillation: an increase right after a decrease is
//! halved, while a run of consecutive decreases accelerates the backoff.
//!
//! Each key supplied to `consume` is additionally held to the current limit within
//! its own fixed window.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::LimiterError;
use crate::rate_limit::limits::adaptive::{
    BACKOFF_ACCELERATION, DEFAULT_BACKOFF_ACCELERATION_AFTER, DEFAULT_MAX_SAMPLES,
    DEFAULT_MAX_TRACKED_KEYS, ERROR_RATE_THRESHOLD, EXCELLENT_LATENCY_RATIO,
    EXCELLENT_SUCCESS_RATE, HIGH_LATENCY_RATIO, POOR_LATENCY_RATIO, POOR_SUCCESS_RATE,
    REBOUND_DAMPING,
};
use crate::rate_limit::metrics::{LatencyTrend, PerformanceMetrics, RequestOutcome, RequestSample};
use crate::rate_limit::ttl_cache::TtlCache;
use crate::rate_limit::{Fault, RateLimiter, validate_amount};
use crate::types::serde_helpers::duration_ms;
use crate::types::{Decision, FailurePolicy, RateLimitKey};

/// Adaptive limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Starting limit, restored by `reset`.
    pub max_requests: u32,
    /// Rolling window the limit applies to.
    #[serde(rename = "window_size_ms", with = "duration_ms")]
    pub window_size: Duration,
    /// Success rate the downstream is expected to sustain, in `[0, 1]`.
    pub target_success_rate: f64,
    /// Average latency the downstream is expected to stay under.
    pub target_latency_ms: f64,
    /// Share of the current limit moved per adjustment, in `(0, 1]`.
    pub adjustment_factor: f64,
    /// Lowest limit the control loop may set.
    pub min_limit: u32,
    /// Highest limit the control loop may set.
    pub max_limit: u32,
    /// Cadence of the control loop and span of samples it looks at.
    #[serde(rename = "measurement_window_ms", with = "duration_ms")]
    pub measurement_window: Duration,
    /// Samples needed before the control loop acts.
    pub min_samples: u32,
    /// Bound on retained samples; the oldest are dropped first.
    pub max_samples: usize,
    /// Bound on keys with their own counters.
    pub max_tracked_keys: usize,
    /// Consecutive decreases after which further decreases are accelerated.
    pub backoff_acceleration_after: u32,
    /// Behavior on internal faults.
    pub failure_policy: FailurePolicy,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_size: Duration::from_secs(60),
            target_success_rate: 0.95,
            target_latency_ms: 1_000.0,
            adjustment_factor: 0.1,
            min_limit: 10,
            max_limit: 1_000,
            measurement_window: Duration::from_secs(60),
            min_samples: 10,
            max_samples: DEFAULT_MAX_SAMPLES,
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
            backoff_acceleration_after: DEFAULT_BACKOFF_ACCELERATION_AFTER,
            failure_policy: FailurePolicy::OpenThrottled,
        }
    }
}

impl AdaptiveConfig {
    /// Create a new configuration builder.
    pub fn builder() -> AdaptiveConfigBuilder {
        AdaptiveConfigBuilder::new()
    }

    /// Check every bound. Called by [`AdaptiveLimiter::new`].
    pub fn validate(&self) -> Result<(), LimiterError> {
        if self.min_limit == 0 {
            return Err(LimiterError::invalid_config("min_limit", "must be at least 1"));
        }
        if self.min_limit > self.max_limit {
            return Err(LimiterError::invalid_config(
                "min_limit",
                format!("{} exceeds max_limit {}", self.min_limit, self.max_limit),
            ));
        }
        if self.max_requests < self.min_limit || self.max_requests > self.max_limit {
            return Err(LimiterError::invalid_config(
                "max_requests",
                format!(
                    "{} is outside [{}, {}]",
                    self.max_requests, self.min_limit, self.max_limit
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.target_success_rate) {
            return Err(LimiterError::invalid_config(
                "target_success_rate",
                format!("must be within [0, 1], got {}", self.target_success_rate),
            ));
        }
        if !self.target_latency_ms.is_finite() || self.target_latency_ms <= 0.0 {
            return Err(LimiterError::invalid_config(
                "target_latency_ms",
                format!("must be a positive finite number, got {}", self.target_latency_ms),
            ));
        }
        if !(self.adjustment_factor > 0.0 && self.adjustment_factor <= 1.0) {
            return Err(LimiterError::invalid_config(
                "adjustment_factor",
                format!("must be within (0, 1], got {}", self.adjustment_factor),
            ));
        }
        if self.window_size.as_millis() == 0 {
            return Err(LimiterError::invalid_config("window_size", "must be greater than 0"));
        }
        if self.measurement_window.as_millis() == 0 {
            return Err(LimiterError::invalid_config(
                "measurement_window",
                "must be greater than 0",
            ));
        }
        if self.min_samples == 0 {
            return Err(LimiterError::invalid_config("min_samples", "must be greater than 0"));
        }
        if self.max_samples == 0 {
            return Err(LimiterError::invalid_config("max_samples", "must be greater than 0"));
        }
        if self.max_tracked_keys == 0 {
            return Err(LimiterError::invalid_config(
                "max_tracked_keys",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// How long samples and key rows are kept.
    fn retention(&self) -> Duration {
        self.window_size.max(self.measurement_window)
    }
}

/// Builder for [`AdaptiveConfig`].
#[derive(Debug, Clone, Default)]
pub struct AdaptiveConfigBuilder {
    config: AdaptiveConfig,
}

impl AdaptiveConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: AdaptiveConfig::default(),
        }
    }

    /// Set the starting limit.
    pub fn max_requests(mut self, max: u32) -> Self {
        self.config.max_requests = max;
        self
    }

    /// Set the rolling window.
    pub fn window_size(mut self, window: Duration) -> Self {
        self.config.window_size = window;
        self
    }

    /// Set the target success rate.
    pub fn target_success_rate(mut self, rate: f64) -> Self {
        self.config.target_success_rate = rate;
        self
    }

    /// Set the target average latency in milliseconds.
    pub fn target_latency_ms(mut self, latency: f64) -> Self {
        self.config.target_latency_ms = latency;
        self
    }

    /// Set the adjustment factor.
    pub fn adjustment_factor(mut self, factor: f64) -> Self {
        self.config.adjustment_factor = factor;
        self
    }

    /// Set the bounds of the dynamic limit.
    pub fn limits(mut self, min: u32, max: u32) -> Self {
        self.config.min_limit = min;
        self.config.max_limit = max;
        self
    }

    /// Set the measurement window.
    pub fn measurement_window(mut self, window: Duration) -> Self {
        self.config.measurement_window = window;
        self
    }

    /// Set the samples needed before adjusting.
    pub fn min_samples(mut self, samples: u32) -> Self {
        self.config.min_samples = samples;
        self
    }

    /// Set the bound on retained samples.
    pub fn max_samples(mut self, samples: usize) -> Self {
        self.config.max_samples = samples;
        self
    }

    /// Set the bound on tracked keys.
    pub fn max_tracked_keys(mut self, keys: usize) -> Self {
        self.config.max_tracked_keys = keys;
        self
    }

    /// Set the decrease streak after which backoff accelerates.
    pub fn backoff_acceleration_after(mut self, decreases: u32) -> Self {
        self.config.backoff_acceleration_after = decreases;
        self
    }

    /// Set the failure policy.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> AdaptiveConfig {
        self.config
    }
}

/// Direction of the most recent limit change and how many moves in a row went
/// that way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "snake_case")]
pub enum AdjustmentState {
    /// The limit has not moved since construction or reset
    #[default]
    Stable,
    /// The last `streak` changes raised the limit
    Increasing { streak: u32 },
    /// The last `streak` changes lowered the limit
    Decreasing { streak: u32 },
}

impl AdjustmentState {
    /// Number of consecutive decreases ending with the last change.
    pub fn decrease_streak(&self) -> u32 {
        match self {
            AdjustmentState::Decreasing { streak } => *streak,
            _ => 0,
        }
    }

    fn after_increase(self) -> Self {
        match self {
            AdjustmentState::Increasing { streak } => AdjustmentState::Increasing {
                streak: streak.saturating_add(1),
            },
            _ => AdjustmentState::Increasing { streak: 1 },
        }
    }

    fn after_decrease(self) -> Self {
        match self {
            AdjustmentState::Decreasing { streak } => AdjustmentState::Decreasing {
                streak: streak.saturating_add(1),
            },
            _ => AdjustmentState::Decreasing { streak: 1 },
        }
    }
}

impl std::fmt::Display for AdjustmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdjustmentState::Stable => write!(f, "stable"),
            AdjustmentState::Increasing { streak } => write!(f, "increasing x{}", streak),
            AdjustmentState::Decreasing { streak } => write!(f, "decreasing x{}", streak),
        }
    }
}

/// Snapshot of an adaptive limiter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveState {
    /// Limit currently enforced.
    pub current_limit: u32,
    /// Configured starting limit.
    pub base_limit: u32,
    /// Lower bound of the limit.
    pub min_limit: u32,
    /// Upper bound of the limit.
    pub max_limit: u32,
    /// Units admitted within the rolling window.
    pub usage: u64,
    /// Usage as a share of the current limit, in percent.
    pub utilization_percent: f64,
    /// Direction of the last limit change.
    pub adjustment: AdjustmentState,
    /// Metrics from the last control loop run that had enough samples.
    pub last_metrics: Option<PerformanceMetrics>,
    /// Samples currently retained.
    pub sample_count: usize,
    /// Keys with live counters.
    pub tracked_keys: usize,
    /// Calls to `consume` since construction or reset.
    pub total_requests: u64,
    /// Calls that were denied.
    pub rejected_requests: u64,
    /// Number of times the limit changed.
    pub adjustments: u64,
}

/// Per-key counter within a fixed window.
#[derive(Debug, Clone, Copy)]
struct KeyWindow {
    count: u32,
    reset_at: u64,
}

/// A rate limiter whose limit follows downstream health.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use adaptive_rate_limit::clock::ManualClock;
/// use adaptive_rate_limit::rate_limit::{AdaptiveConfig, AdaptiveLimiter, RateLimiter};
///
/// let clock = ManualClock::new(0);
/// let config = AdaptiveConfig::builder()
///     .max_requests(50)
///     .limits(10, 200)
///     .measurement_window(Duration::from_secs(10))
///     .build();
/// let mut limiter = AdaptiveLimiter::new(config, clock.shared()).unwrap();
///
/// let decision = limiter.consume(Some(&"user-1".into()), 1).unwrap();
/// assert!(decision.allowed());
///
/// limiter.record_request(true, 120.0, None, Some(200)).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct AdaptiveLimiter {
    config: AdaptiveConfig,
    limit: u32,
    samples: VecDeque<RequestSample>,
    /// Admission timestamps and amounts, oldest first
    admissions: VecDeque<(u64, u32)>,
    /// Sum of amounts in `admissions`
    admitted: u64,
    keys: TtlCache<RateLimitKey, KeyWindow>,
    last_adjustment: u64,
    adjustment: AdjustmentState,
    last_metrics: Option<PerformanceMetrics>,
    last_seen: u64,
    total_requests: u64,
    rejected_requests: u64,
    adjustments: u64,
    clock: Arc<dyn Clock>,
}

impl AdaptiveLimiter {
    /// Create a new adaptive limiter. The configuration is validated first.
    pub fn new(config: AdaptiveConfig, clock: Arc<dyn Clock>) -> Result<Self, LimiterError> {
        config.validate()?;

        let now = clock.now_ms();
        let keys = TtlCache::new(config.retention(), config.max_tracked_keys);

        Ok(Self {
            limit: config.max_requests,
            samples: VecDeque::new(),
            admissions: VecDeque::new(),
            admitted: 0,
            keys,
            last_adjustment: now,
            adjustment: AdjustmentState::Stable,
            last_metrics: None,
            last_seen: now,
            total_requests: 0,
            rejected_requests: 0,
            adjustments: 0,
            clock,
            config,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Limit currently enforced.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Direction of the last limit change.
    pub fn adjustment(&self) -> AdjustmentState {
        self.adjustment
    }

    /// Record the outcome of a piece of guarded work.
    ///
    /// # Arguments
    ///
    /// * `success` - Whether the work succeeded
    /// * `latency_ms` - How long it took; must be finite and non-negative
    /// * `error_type` - Optional error classification
    /// * `status_code` - Optional HTTP status, within `100..=599`
    pub fn record_request(
        &mut self,
        success: bool,
        latency_ms: f64,
        error_type: Option<&str>,
        status_code: Option<u16>,
    ) -> Result<(), LimiterError> {
        self.record(RequestOutcome {
            success,
            latency_ms,
            error_type: error_type.map(str::to_string),
            status_code,
        })
    }

    /// Record a [`RequestOutcome`].
    pub fn record(&mut self, outcome: RequestOutcome) -> Result<(), LimiterError> {
        outcome.validate()?;

        let mut now = self.clock.now_ms();
        if now < self.last_seen {
            tracing::warn!(
                last_ms = self.last_seen,
                now_ms = now,
                "Clock moved backwards, stamping sample at last seen time"
            );
            now = self.last_seen;
        }
        self.last_seen = now;

        if self.samples.len() >= self.config.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(RequestSample::new(now, outcome));
        self.expire(now);
        Ok(())
    }

    /// Run the control loop now, regardless of cadence. Returns the limit afterwards.
    pub fn adjust_limit(&mut self) -> u32 {
        let now = self.clock.now_ms();
        if now >= self.last_seen {
            self.last_seen = now;
            self.expire(now);
            self.run_adjustment(now);
        }
        self.limit
    }

    fn window_ms(&self) -> u64 {
        self.config.window_size.as_millis() as u64
    }

    fn measurement_ms(&self) -> u64 {
        self.config.measurement_window.as_millis() as u64
    }

    /// Drop samples, admissions and key rows that have aged out.
    fn expire(&mut self, now: u64) {
        let retention = self.config.retention().as_millis() as u64;
        while self
            .samples
            .front()
            .is_some_and(|s| now.saturating_sub(s.timestamp_ms) >= retention)
        {
            self.samples.pop_front();
        }

        let window = self.window_ms();
        while let Some(&(at, amount)) = self.admissions.front() {
            if now.saturating_sub(at) < window {
                break;
            }
            self.admissions.pop_front();
            self.admitted = self.admitted.saturating_sub(amount as u64);
        }

        self.keys.cleanup(now);
    }

    fn run_adjustment(&mut self, now: u64) {
        let measurement = self.measurement_ms();
        let in_window = |s: &&RequestSample| now.saturating_sub(s.timestamp_ms) < measurement;
        if self.samples.iter().filter(in_window).count() < self.config.min_samples as usize {
            return;
        }
        let Some(metrics) = PerformanceMetrics::from_samples(self.samples.iter().filter(in_window))
        else {
            return;
        };
        self.last_adjustment = now;

        let previous = self.limit;
        let proposed = self.propose_limit(&metrics);
        if proposed != previous {
            self.adjustment = if proposed > previous {
                self.adjustment.after_increase()
            } else {
                self.adjustment.after_decrease()
            };
            self.limit = proposed;
            self.adjustments = self.adjustments.saturating_add(1);

            tracing::debug!(
                previous,
                limit = proposed,
                adjustment = %self.adjustment,
                success_rate = metrics.success_rate,
                average_latency_ms = metrics.average_latency_ms,
                error_rate = metrics.error_rate,
                "Adaptive limit adjusted"
            );
        }
        self.last_metrics = Some(metrics);
    }

    /// The clamped limit the control loop would move to given `metrics`.
    fn propose_limit(&self, metrics: &PerformanceMetrics) -> u32 {
        let config = &self.config;
        let limit = self.limit;
        let target_latency = config.target_latency_ms;
        let latency = metrics.average_latency_ms;
        let rising = metrics.latency_trend == LatencyTrend::Increasing;

        let increase = metrics.success_rate >= config.target_success_rate
            && latency <= target_latency
            && !rising
            && limit < config.max_limit;
        let decrease = (metrics.success_rate < config.target_success_rate
            || latency > HIGH_LATENCY_RATIO * target_latency
            || rising
            || metrics.error_rate > ERROR_RATE_THRESHOLD)
            && limit > config.min_limit;

        let base = limit as f64 * config.adjustment_factor;
        let proposed = match (increase, decrease) {
            (true, false) => {
                let mut step = base;
                if metrics.success_rate > EXCELLENT_SUCCESS_RATE
                    && latency < EXCELLENT_LATENCY_RATIO * target_latency
                {
                    step *= 2.0;
                }
                if matches!(self.adjustment, AdjustmentState::Decreasing { .. }) {
                    step *= REBOUND_DAMPING;
                }
                limit as f64 + step.ceil().max(1.0)
            }
            (false, true) => {
                let mut step = base;
                if metrics.success_rate < POOR_SUCCESS_RATE
                    || latency > POOR_LATENCY_RATIO * target_latency
                {
                    step *= 2.0;
                }
                if self.adjustment.decrease_streak() >= config.backoff_acceleration_after {
                    step *= BACKOFF_ACCELERATION;
                }
                limit as f64 - step.ceil().max(1.0)
            }
            // Conflicting or no signal
            _ => limit as f64,
        };

        proposed.clamp(config.min_limit as f64, config.max_limit as f64) as u32
    }

    /// Time until every current admission has left the window.
    fn reset_time(&self, now: u64) -> Duration {
        match self.admissions.back() {
            Some(&(at, _)) => Duration::from_millis((at + self.window_ms()).saturating_sub(now)),
            None => Duration::ZERO,
        }
    }

    /// Time until enough admissions expire for `amount` more to fit.
    fn global_retry_after(&self, now: u64, amount: u32) -> Duration {
        let limit = self.limit as u64;
        let mut live = self.admitted;
        for &(at, admitted) in &self.admissions {
            live = live.saturating_sub(admitted as u64);
            if live + amount as u64 <= limit {
                let wait = (at + self.window_ms()).saturating_sub(now);
                return Duration::from_millis(wait.max(1));
            }
        }
        Duration::from_millis(self.window_ms())
    }

    fn try_consume(
        &mut self,
        key: Option<&RateLimitKey>,
        amount: u32,
        now: u64,
    ) -> Result<Decision, Fault> {
        if now < self.last_seen {
            return Err(Fault::ClockRegression {
                last_ms: self.last_seen,
                now_ms: now,
            });
        }
        self.last_seen = now;
        self.expire(now);

        let limit = self.limit;
        let key_row = key
            .and_then(|k| self.keys.get(k, now))
            .copied()
            .filter(|row| now < row.reset_at);

        if let Some(row) = key_row {
            if row.count as u64 + amount as u64 > limit as u64 {
                let wait = Duration::from_millis(row.reset_at - now);
                return Ok(Decision::deny(
                    limit.saturating_sub(row.count),
                    wait,
                    limit,
                    wait,
                ));
            }
        }

        let global_remaining = (limit as u64).saturating_sub(self.admitted) as u32;
        if self.admitted + amount as u64 > limit as u64 {
            return Ok(Decision::deny(
                global_remaining,
                self.reset_time(now),
                limit,
                self.global_retry_after(now, amount),
            ));
        }

        self.admitted = self
            .admitted
            .checked_add(amount as u64)
            .ok_or(Fault::Overflow("adaptive admissions"))?;
        self.admissions.push_back((now, amount));

        let mut remaining = global_remaining - amount;
        if let Some(key) = key {
            let count = match key_row {
                Some(row) => {
                    let count = row.count + amount;
                    if let Some(live) = self.keys.get_mut(key, now) {
                        live.count = count;
                    }
                    count
                }
                None => {
                    let row = KeyWindow {
                        count: amount,
                        reset_at: now + self.window_ms(),
                    };
                    if let Some((evicted, _)) = self.keys.insert(key.clone(), row, now) {
                        tracing::debug!(%evicted, "Adaptive limiter key table full, evicted oldest key");
                    }
                    amount
                }
            };
            remaining = remaining.min(limit.saturating_sub(count));
        }

        Ok(Decision::allow(remaining, self.reset_time(now), limit))
    }

    fn check_amount(&self, amount: u32) -> Result<(), LimiterError> {
        validate_amount(amount)?;
        if amount > self.config.max_limit {
            return Err(LimiterError::ExceedsCapacity {
                requested: amount,
                capacity: self.config.max_limit,
            });
        }
        Ok(())
    }
}

impl RateLimiter for AdaptiveLimiter {
    type State = AdaptiveState;

    fn consume(&mut self, key: Option<&RateLimitKey>, amount: u32) -> Result<Decision, LimiterError> {
        self.check_amount(amount)?;

        let now = self.clock.now_ms();
        let seen = self.total_requests;
        self.total_requests = self.total_requests.saturating_add(1);

        let decision = match self.try_consume(key, amount, now) {
            Ok(decision) => {
                if now.saturating_sub(self.last_adjustment) >= self.measurement_ms() {
                    self.run_adjustment(now);
                }
                decision
            }
            Err(fault) => {
                let policy = self.config.failure_policy;
                tracing::warn!(%fault, %policy, "Adaptive limiter fault, applying failure policy");
                policy.fallback(
                    self.limit,
                    self.config.max_requests,
                    seen,
                    self.config.window_size,
                )
            }
        };

        if !decision.allowed() {
            self.rejected_requests = self.rejected_requests.saturating_add(1);
            tracing::trace!(
                key = key.map(tracing::field::display),
                amount,
                limit = decision.limit(),
                retry_after_ms = decision.retry_after_ms(),
                "Adaptive limiter denied request"
            );
        }
        Ok(decision)
    }

    fn can_consume(&mut self, amount: u32) -> Result<bool, LimiterError> {
        self.check_amount(amount)?;

        let now = self.clock.now_ms();
        if now < self.last_seen {
            return Ok(false);
        }
        self.expire(now);
        Ok(self.admitted + amount as u64 <= self.limit as u64)
    }

    fn max_admissible(&self) -> u32 {
        self.config.max_limit
    }

    fn state(&mut self) -> AdaptiveState {
        let now = self.clock.now_ms();
        if now >= self.last_seen {
            self.expire(now);
        }

        AdaptiveState {
            current_limit: self.limit,
            base_limit: self.config.max_requests,
            min_limit: self.config.min_limit,
            max_limit: self.config.max_limit,
            usage: self.admitted,
            utilization_percent: self.admitted as f64 / self.limit as f64 * 100.0,
            adjustment: self.adjustment,
            last_metrics: self.last_metrics.clone(),
            sample_count: self.samples.len(),
            tracked_keys: self.keys.active_count(now),
            total_requests: self.total_requests,
            rejected_requests: self.rejected_requests,
            adjustments: self.adjustments,
        }
    }

    fn reset(&mut self) {
        let now = self.clock.now_ms();
        self.limit = self.config.max_requests;
        self.samples.clear();
        self.admissions.clear();
        self.admitted = 0;
        self.keys.clear();
        self.last_adjustment = now;
        self.adjustment = AdjustmentState::Stable;
        self.last_metrics = None;
        self.last_seen = now;
        self.total_requests = 0;
        self.rejected_requests = 0;
        self.adjustments = 0;
    }

    fn compact(&mut self) {
        let now = self.clock.now_ms();
        if now < self.last_seen {
            return;
        }
        let keys_before = self.keys.len();
        let samples_before = self.samples.len();
        self.expire(now);
        self.samples.shrink_to_fit();
        self.admissions.shrink_to_fit();
        tracing::debug!(
            expired_keys = keys_before - self.keys.len(),
            expired_samples = samples_before - self.samples.len(),
            "Adaptive limiter compacted"
        );
    }
}
