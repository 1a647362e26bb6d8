use std::time::Duration;

use adaptive_rate_limit::clock::ManualClock;
use adaptive_rate_limit::rate_limit::{RateLimiter, TokenBucket, TokenBucketConfig};

fn build(capacity: u32, refill_rate: f64, max_burst: u32) -> (TokenBucket, ManualClock) {
    let clock = ManualClock::new(1_000);
    let config = TokenBucketConfig::builder()
        .capacity(capacity)
        .refill_rate(refill_rate)
        .max_burst(max_burst)
        .build();
    let bucket = TokenBucket::new(config, clock.shared()).unwrap();
    (bucket, clock)
}

#[test]
fn test_ten_then_denied_then_one_more_after_a_second() {
    let (mut bucket, clock) = build(10, 1.0, 10);

    for i in 0..10 {
        let decision = bucket.consume(None, 1).unwrap();
        assert!(decision.allowed(), "call {} should be allowed", i + 1);
        assert_eq!(decision.remaining(), 9 - i);
    }

    let denied = bucket.consume(None, 1).unwrap();
    assert!(!denied.allowed());
    assert_eq!(denied.remaining(), 0);
    assert_eq!(denied.retry_after(), Duration::from_millis(1_000));
    assert_eq!(denied.limit(), 10);

    clock.advance(Duration::from_millis(1_000));
    let decision = bucket.consume(None, 1).unwrap();
    assert!(decision.allowed());
    assert_eq!(decision.remaining(), 0);
}

#[test]
fn test_tokens_never_increase_without_elapsed_time() {
    let (mut bucket, _clock) = build(20, 5.0, 20);

    let mut previous = bucket.available_tokens();
    for amount in [3, 1, 7, 20, 4, 2, 9, 1, 1, 5] {
        let _ = bucket.consume(None, amount).unwrap();
        let now = bucket.available_tokens();
        assert!(now <= previous, "{} > {}", now, previous);
        assert!(now >= 0.0);
        previous = now;
    }
}

#[test]
fn test_refill_reaches_burst_cap_after_capacity_over_rate() {
    let (mut bucket, clock) = build(10, 2.0, 6);

    assert!(bucket.consume(None, 6).unwrap().allowed());
    assert_eq!(bucket.available_tokens(), 0.0);

    // capacity / refill_rate = 5 seconds
    clock.advance(Duration::from_secs(5));
    assert_eq!(bucket.available_tokens(), 6.0);

    clock.advance(Duration::from_secs(60));
    assert_eq!(bucket.available_tokens(), 6.0);
}

#[test]
fn test_irregular_intervals_accrue_exactly() {
    let (mut bucket, clock) = build(100, 3.0, 100);

    assert!(bucket.consume(None, 100).unwrap().allowed());
    for step in [1, 7, 333, 59, 600] {
        clock.advance_ms(step);
        bucket.available_tokens();
    }
    // 1000ms at 3 tokens per second
    assert_eq!(bucket.available_tokens(), 3.0);
}

#[test]
fn test_reset_restores_initial_state() {
    let (mut bucket, _clock) = build(10, 1.0, 10);
    let initial = bucket.state();

    for _ in 0..12 {
        let _ = bucket.consume(None, 1).unwrap();
    }
    assert_ne!(bucket.state(), initial);

    bucket.reset();
    assert_eq!(bucket.state(), initial);
    bucket.reset();
    assert_eq!(bucket.state(), initial);
}

#[test]
fn test_amount_above_burst_is_denied_not_an_error() {
    let (mut bucket, _clock) = build(10, 1.0, 4);

    let decision = bucket.consume(None, 5).unwrap();
    assert!(!decision.allowed());
    assert_eq!(bucket.available_tokens(), 4.0);

    assert!(bucket.consume(None, 11).unwrap_err().is_unsatisfiable());
}
