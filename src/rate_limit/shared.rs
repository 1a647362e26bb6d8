//! Async handle for sharing one limiter between tasks.
//!
//! Limiters themselves take `&mut self` and do no locking. [`SharedLimiter`]
//! wraps one in an `Arc<tokio::sync::Mutex<_>>` so concurrent callers are
//! serialized, and adds [`acquire`](SharedLimiter::acquire), which waits out
//! denials instead of returning them.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use adaptive_rate_limit::clock::MonotonicClock;
//! use adaptive_rate_limit::rate_limit::{SharedLimiter, TokenBucket, TokenBucketConfig};
//!
//! let bucket = TokenBucket::new(TokenBucketConfig::default(), MonotonicClock::shared())?;
//! let limiter = SharedLimiter::new(bucket);
//!
//! // Waits for tokens, but gives up if that would take more than 2 seconds
//! limiter.acquire(None, 1, Some(Duration::from_secs(2))).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::LimiterError;
use crate::rate_limit::RateLimiter;
use crate::rate_limit::adaptive::AdaptiveLimiter;
use crate::rate_limit::metrics::RequestOutcome;
use crate::types::{Decision, RateLimitKey};

/// A limiter shared between tasks.
///
/// Cloning is cheap and every clone refers to the same limiter.
pub struct SharedLimiter<L> {
    inner: Arc<Mutex<L>>,
}

impl<L> Clone for SharedLimiter<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L> std::fmt::Debug for SharedLimiter<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLimiter")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish_non_exhaustive()
    }
}

impl<L> SharedLimiter<L>
where
    L: RateLimiter,
{
    /// Wrap a limiter for shared use.
    pub fn new(limiter: L) -> Self {
        Self {
            inner: Arc::new(Mutex::new(limiter)),
        }
    }

    /// Try to admit `amount` units. Denials are returned, not waited out.
    pub async fn consume(
        &self,
        key: Option<&RateLimitKey>,
        amount: u32,
    ) -> Result<Decision, LimiterError> {
        self.inner.lock().await.consume(key, amount)
    }

    /// Check whether `amount` units would be admitted right now.
    pub async fn can_consume(&self, amount: u32) -> Result<bool, LimiterError> {
        self.inner.lock().await.can_consume(amount)
    }

    /// Admit `amount` units, sleeping through denials.
    ///
    /// Each denial's retry hint is slept off before trying again. With a
    /// `max_wait`, the call fails with [`LimiterError::RateLimitExceeded`] as soon
    /// as the next sleep would push the total wait past it; the lock is never held
    /// while sleeping. An amount above
    /// [`max_admissible`](RateLimiter::max_admissible) fails at once with
    /// [`LimiterError::ExceedsCapacity`], since no wait can satisfy it.
    pub async fn acquire(
        &self,
        key: Option<&RateLimitKey>,
        amount: u32,
        max_wait: Option<Duration>,
    ) -> Result<Decision, LimiterError> {
        let capacity = self.inner.lock().await.max_admissible();
        if amount > capacity {
            return Err(LimiterError::ExceedsCapacity {
                requested: amount,
                capacity,
            });
        }

        let mut waited = Duration::ZERO;

        loop {
            let decision = self.consume(key, amount).await?;
            if decision.allowed() {
                return Ok(decision);
            }

            let wait_time = decision.retry_after().max(Duration::from_millis(1));
            if let Some(max_wait) = max_wait {
                if waited + wait_time > max_wait {
                    tracing::debug!(
                        waited_ms = waited.as_millis() as u64,
                        retry_after_ms = decision.retry_after_ms(),
                        "Giving up on rate limit wait"
                    );
                    return Err(LimiterError::RateLimitExceeded {
                        retry_after_ms: decision.retry_after_ms(),
                    });
                }
            }

            tokio::time::sleep(wait_time).await;
            waited += wait_time;
        }
    }

    /// Current state snapshot.
    pub async fn state(&self) -> L::State {
        self.inner.lock().await.state()
    }

    /// Reset the limiter.
    pub async fn reset(&self) {
        self.inner.lock().await.reset();
    }

    /// Run the limiter's maintenance pass.
    pub async fn compact(&self) {
        self.inner.lock().await.compact();
    }

    /// Run a closure with exclusive access to the limiter.
    pub async fn with_limiter<R>(&self, f: impl FnOnce(&mut L) -> R) -> R {
        let mut limiter = self.inner.lock().await;
        f(&mut limiter)
    }
}

impl SharedLimiter<AdaptiveLimiter> {
    /// Report the outcome of guarded work to the adaptive limiter.
    pub async fn record_request(
        &self,
        success: bool,
        latency_ms: f64,
        error_type: Option<&str>,
        status_code: Option<u16>,
    ) -> Result<(), LimiterError> {
        self.inner
            .lock()
            .await
            .record_request(success, latency_ms, error_type, status_code)
    }

    /// Report a [`RequestOutcome`] to the adaptive limiter.
    pub async fn record(&self, outcome: RequestOutcome) -> Result<(), LimiterError> {
        self.inner.lock().await.record(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rate_limit::{TokenBucket, TokenBucketConfig};

    fn shared_bucket(capacity: u32) -> (SharedLimiter<TokenBucket>, ManualClock) {
        let clock = ManualClock::new(0);
        let config = TokenBucketConfig::builder()
            .capacity(capacity)
            .refill_rate(1.0)
            .build();
        let bucket = TokenBucket::new(config, clock.shared()).unwrap();
        (SharedLimiter::new(bucket), clock)
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let (limiter, _clock) = shared_bucket(2);
        let other = limiter.clone();

        assert!(limiter.consume(None, 2).await.unwrap().allowed());
        assert!(!other.can_consume(1).await.unwrap());

        other.reset().await;
        assert!(limiter.can_consume(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_acquire_rejects_past_max_wait() {
        let (limiter, _clock) = shared_bucket(1);

        limiter.consume(None, 1).await.unwrap();
        // The manual clock never advances, so any wait is over budget
        let err = limiter
            .acquire(None, 1, Some(Duration::from_millis(500)))
            .await
            .unwrap_err();
        assert_eq!(err.retry_after_ms(), Some(1_000));
    }

    #[tokio::test]
    async fn test_acquire_rejects_amount_above_burst() {
        let clock = ManualClock::new(0);
        let config = TokenBucketConfig::builder()
            .capacity(10)
            .max_burst(2)
            .refill_rate(1000.0)
            .build();
        let limiter = SharedLimiter::new(TokenBucket::new(config, clock.shared()).unwrap());

        let result = tokio::time::timeout(Duration::from_secs(2), limiter.acquire(None, 3, None))
            .await
            .expect("acquire should not wait on an amount it can never grant");
        assert!(matches!(
            result,
            Err(LimiterError::ExceedsCapacity {
                requested: 3,
                capacity: 2
            })
        ));
        assert!(limiter.acquire(None, 2, None).await.unwrap().allowed());
    }

    #[tokio::test]
    async fn test_with_limiter() {
        let (limiter, _clock) = shared_bucket(5);

        let tokens = limiter.with_limiter(|bucket| bucket.available_tokens()).await;
        assert_eq!(tokens, 5.0);
    }
}
