use std::time::{Duration, Instant};

use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::EnvFilter;

use adaptive_rate_limit::clock::{ManualClock, MonotonicClock};
use adaptive_rate_limit::rate_limit::{
    AdaptiveConfig, AdaptiveLimiter, Compactor, KeyedLimiter, SharedLimiter,
    SlidingWindow, SlidingWindowConfig, TokenBucket, TokenBucketConfig,
};
use adaptive_rate_limit::{LimiterError, RateLimitKey};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn bucket(capacity: u32, refill_rate: f64) -> SharedLimiter<TokenBucket> {
    let config = TokenBucketConfig::builder()
        .capacity(capacity)
        .refill_rate(refill_rate)
        .build();
    SharedLimiter::new(TokenBucket::new(config, MonotonicClock::shared()).unwrap())
}

#[tokio::test]
async fn test_acquire_waits_for_refill() {
    init_tracing();
    let limiter = bucket(1, 20.0);

    assert_ok!(limiter.consume(None, 1).await);
    let start = Instant::now();
    let decision = assert_ok!(limiter.acquire(None, 1, Some(Duration::from_secs(1))).await);

    assert!(decision.allowed());
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[tokio::test]
async fn test_acquire_rejects_when_wait_exceeds_budget() {
    init_tracing();
    let limiter = bucket(1, 1.0);

    assert_ok!(limiter.consume(None, 1).await);
    let err = assert_err!(limiter.acquire(None, 1, Some(Duration::from_millis(100))).await);

    assert!(matches!(err, LimiterError::RateLimitExceeded { .. }));
    let retry = err.retry_after_ms().unwrap();
    assert!(retry > 100 && retry <= 1_000, "retry hint {}ms", retry);
}

#[tokio::test]
async fn test_concurrent_callers_never_overshoot() {
    init_tracing();
    let clock = ManualClock::new(0);
    let config = SlidingWindowConfig::builder()
        .window_size(Duration::from_secs(60))
        .max_requests(25)
        .build();
    let limiter = SharedLimiter::new(SlidingWindow::new(config, clock.shared()).unwrap());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            let mut allowed = 0;
            for _ in 0..10 {
                if limiter.consume(None, 1).await.unwrap().allowed() {
                    allowed += 1;
                }
            }
            allowed
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert_eq!(total, 25);
    assert_eq!(limiter.state().await.rejected_requests, 75);
}

#[tokio::test]
async fn test_adaptive_feedback_through_shared_handle() {
    init_tracing();
    let clock = ManualClock::new(0);
    let config = AdaptiveConfig::builder()
        .measurement_window(Duration::from_secs(1))
        .window_size(Duration::from_secs(1))
        .build();
    let limiter = SharedLimiter::new(AdaptiveLimiter::new(config, clock.shared()).unwrap());

    clock.advance_ms(100);
    for _ in 0..10 {
        assert_ok!(limiter.record_request(true, 10.0, None, Some(200)).await);
    }
    assert_err!(limiter.record_request(true, -1.0, None, None).await);

    clock.advance_ms(400);
    assert_ok!(limiter.consume(Some(&RateLimitKey::from(1u64)), 1).await);
    clock.advance_ms(500);
    assert_ok!(limiter.consume(None, 1).await);

    // Excellent metrics double the 10% step
    assert_eq!(limiter.with_limiter(|l| l.limit()).await, 120);
}

#[tokio::test]
async fn test_compactor_runs_on_interval_and_trigger() {
    init_tracing();
    let clock = ManualClock::new(0);
    let config = TokenBucketConfig::builder().capacity(5).refill_rate(1.0).build();
    let template = TokenBucket::new(config, clock.shared()).unwrap();
    let keyed = KeyedLimiter::new(template, clock.shared(), Duration::from_secs(10), 100);
    let limiter = SharedLimiter::new(keyed);

    for id in 0..5u64 {
        assert_ok!(limiter.consume(Some(&RateLimitKey::from(id)), 1).await);
    }
    assert_eq!(limiter.state().await.tracked_keys, 5);

    let compactor = Compactor::spawn(limiter.clone(), Duration::from_secs(3_600));
    clock.advance(Duration::from_secs(10));
    assert!(compactor.trigger());

    let deadline = Instant::now() + Duration::from_secs(5);
    while compactor.passes() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(compactor.passes(), 1);
    assert_eq!(limiter.with_limiter(|l| l.tracked_keys()).await, 0);

    compactor.shutdown().await;
}

#[tokio::test]
async fn test_compactor_ticks() {
    init_tracing();
    let limiter = bucket(5, 1.0);
    let compactor = Compactor::spawn(limiter.clone(), Duration::from_millis(10));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(compactor.passes() >= 2);

    compactor.shutdown().await;
    assert_ok!(limiter.consume(None, 1).await);
}
