//! Per-key rate limiting.
//!
//! [`KeyedLimiter`] gives every [`RateLimitKey`] its own copy of a template
//! limiter, such as one token bucket per user or per client IP. Keys that stay
//! idle for longer than the configured TTL are forgotten, and the number of
//! tracked keys is capped so an unbounded key space cannot grow memory without
//! limit.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use adaptive_rate_limit::clock::ManualClock;
//! use adaptive_rate_limit::rate_limit::{KeyedLimiter, RateLimiter, TokenBucket, TokenBucketConfig};
//!
//! let clock = ManualClock::new(0);
//! let config = TokenBucketConfig::builder().capacity(5).refill_rate(1.0).build();
//! let template = TokenBucket::new(config, clock.shared()).unwrap();
//!
//! let mut limiter = KeyedLimiter::new(
//!     template,
//!     clock.shared(),
//!     Duration::from_secs(300), // Forget keys idle for 5 minutes
//!     10_000,                   // Track at most 10k keys
//! );
//!
//! let key = "203.0.113.7".into();
//! assert!(limiter.consume(Some(&key), 1).unwrap().allowed());
//! assert_eq!(limiter.tracked_keys(), 1);
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::clock::Clock;
use crate::error::LimiterError;
use crate::rate_limit::RateLimiter;
use crate::rate_limit::ttl_cache::TtlCache;
use crate::types::{Decision, RateLimitKey};

/// Snapshot of a keyed limiter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyedState<S> {
    /// Keys with a live limiter.
    pub tracked_keys: usize,
    /// State of the limiter used for calls without a key.
    pub unkeyed: S,
}

/// One limiter per key, created on first use from a template.
#[derive(Debug, Clone)]
pub struct KeyedLimiter<L> {
    template: L,
    /// Limiter for calls that carry no key
    unkeyed: L,
    limiters: TtlCache<RateLimitKey, L>,
    clock: Arc<dyn Clock>,
}

impl<L> KeyedLimiter<L>
where
    L: RateLimiter + Clone,
{
    /// Create a new per-key limiter.
    ///
    /// # Arguments
    ///
    /// * `template` - Limiter copied, then reset, for every new key
    /// * `clock` - Time source for idle tracking
    /// * `idle_ttl` - How long an unused key keeps its limiter
    /// * `max_keys` - Bound on tracked keys; the least recently used is evicted
    pub fn new(template: L, clock: Arc<dyn Clock>, idle_ttl: Duration, max_keys: usize) -> Self {
        let mut unkeyed = template.clone();
        unkeyed.reset();
        Self {
            template,
            unkeyed,
            limiters: TtlCache::new(idle_ttl, max_keys),
            clock,
        }
    }

    fn fresh(&self) -> L {
        let mut limiter = self.template.clone();
        limiter.reset();
        limiter
    }

    /// Check whether `amount` would be admitted for `key` without consuming.
    pub fn can_consume_key(&mut self, key: &RateLimitKey, amount: u32) -> Result<bool, LimiterError> {
        let now = self.clock.now_ms();
        match self.limiters.get_mut(key, now) {
            Some(limiter) => limiter.can_consume(amount),
            None => self.fresh().can_consume(amount),
        }
    }

    /// Snapshot the limiter of a live key.
    pub fn key_state(&mut self, key: &RateLimitKey) -> Option<L::State> {
        let now = self.clock.now_ms();
        self.limiters.get_mut(key, now).map(|limiter| limiter.state())
    }

    /// Forget a key. Returns whether it was being tracked.
    pub fn remove(&mut self, key: &RateLimitKey) -> bool {
        let now = self.clock.now_ms();
        self.limiters.remove(key, now).is_some()
    }

    /// Number of keys with a live limiter.
    pub fn tracked_keys(&self) -> usize {
        self.limiters.active_count(self.clock.now_ms())
    }
}

impl<L> RateLimiter for KeyedLimiter<L>
where
    L: RateLimiter + Clone,
{
    type State = KeyedState<L::State>;

    fn consume(&mut self, key: Option<&RateLimitKey>, amount: u32) -> Result<Decision, LimiterError> {
        let Some(key) = key else {
            return self.unkeyed.consume(None, amount);
        };

        let now = self.clock.now_ms();
        let template = &self.template;
        let limiter = self.limiters.get_or_insert_with(key.clone(), now, || {
            let mut limiter = template.clone();
            limiter.reset();
            limiter
        });
        limiter.consume(Some(key), amount)
    }

    fn can_consume(&mut self, amount: u32) -> Result<bool, LimiterError> {
        self.unkeyed.can_consume(amount)
    }

    fn max_admissible(&self) -> u32 {
        self.template.max_admissible()
    }

    fn state(&mut self) -> Self::State {
        KeyedState {
            tracked_keys: self.tracked_keys(),
            unkeyed: self.unkeyed.state(),
        }
    }

    fn reset(&mut self) {
        self.limiters.clear();
        self.unkeyed.reset();
    }

    fn compact(&mut self) {
        let now = self.clock.now_ms();
        let expired = self.limiters.cleanup(now);
        for limiter in self.limiters.values_mut(now) {
            limiter.compact();
        }
        self.unkeyed.compact();
        tracing::debug!(
            expired,
            tracked = self.limiters.len(),
            "Keyed limiter compacted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::{TokenBucket, TokenBucketConfig};

    fn keyed(max_keys: usize) -> (KeyedLimiter<TokenBucket>, ManualClock) {
        let clock = ManualClock::new(0);
        let config = TokenBucketConfig::builder().capacity(2).refill_rate(1.0).build();
        let template = TokenBucket::new(config, clock.shared()).unwrap();
        let limiter = KeyedLimiter::new(template, clock.shared(), Duration::from_secs(10), max_keys);
        (limiter, clock)
    }

    #[test]
    fn test_keys_are_independent() {
        let (mut limiter, _clock) = keyed(100);
        let a = RateLimitKey::from("a");
        let b = RateLimitKey::from("b");

        assert!(limiter.consume(Some(&a), 2).unwrap().allowed());
        assert!(!limiter.consume(Some(&a), 1).unwrap().allowed());
        assert!(limiter.consume(Some(&b), 1).unwrap().allowed());
        assert!(limiter.consume(None, 2).unwrap().allowed());

        assert!(!limiter.can_consume_key(&a, 1).unwrap());
        assert!(limiter.can_consume_key(&RateLimitKey::from("c"), 2).unwrap());
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_idle_keys_expire() {
        let (mut limiter, clock) = keyed(100);
        let a = RateLimitKey::from(1u64);

        assert!(limiter.consume(Some(&a), 2).unwrap().allowed());
        clock.advance(Duration::from_secs(10));
        assert_eq!(limiter.tracked_keys(), 0);

        limiter.compact();
        assert_eq!(limiter.state().tracked_keys, 0);
    }

    #[test]
    fn test_least_recently_used_key_is_evicted() {
        let (mut limiter, clock) = keyed(2);
        let a = RateLimitKey::from("a");
        let b = RateLimitKey::from("b");
        let c = RateLimitKey::from("c");

        limiter.consume(Some(&a), 2).unwrap();
        clock.advance_ms(10);
        limiter.consume(Some(&b), 1).unwrap();
        clock.advance_ms(10);
        // Touching "a" makes "b" the stalest
        limiter.consume(Some(&a), 1).unwrap();
        clock.advance_ms(10);
        limiter.consume(Some(&c), 1).unwrap();

        assert_eq!(limiter.tracked_keys(), 2);
        assert!(limiter.key_state(&b).is_none());
        assert!(limiter.key_state(&a).is_some());
    }

    #[test]
    fn test_remove_and_reset() {
        let (mut limiter, _clock) = keyed(100);
        let a = RateLimitKey::from("a");

        limiter.consume(Some(&a), 2).unwrap();
        assert!(limiter.remove(&a));
        assert!(!limiter.remove(&a));
        assert!(limiter.consume(Some(&a), 2).unwrap().allowed());

        limiter.reset();
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
