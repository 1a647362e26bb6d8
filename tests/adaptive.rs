use std::time::Duration;

use adaptive_rate_limit::clock::ManualClock;
use adaptive_rate_limit::rate_limit::{
    AdaptiveConfig, AdaptiveConfigBuilder, AdaptiveLimiter, AdjustmentState, RateLimiter,
    RequestOutcome,
};
use adaptive_rate_limit::{FailurePolicy, LimiterError, RateLimitKey};

fn config() -> AdaptiveConfigBuilder {
    AdaptiveConfig::builder()
        .max_requests(100)
        .limits(10, 200)
        .window_size(Duration::from_secs(1))
        .measurement_window(Duration::from_secs(1))
        .min_samples(10)
        .adjustment_factor(0.1)
        .target_success_rate(0.95)
        .target_latency_ms(1_000.0)
}

fn build(config: AdaptiveConfig) -> (AdaptiveLimiter, ManualClock) {
    let clock = ManualClock::new(0);
    let limiter = AdaptiveLimiter::new(config, clock.shared()).unwrap();
    (limiter, clock)
}

/// Feed one measurement window of outcomes, then let `consume` run the control loop.
fn cycle(limiter: &mut AdaptiveLimiter, clock: &ManualClock, outcomes: &[RequestOutcome]) -> u32 {
    clock.advance_ms(100);
    for outcome in outcomes {
        limiter.record(outcome.clone()).unwrap();
    }
    clock.advance_ms(900);
    limiter.consume(None, 1).unwrap();
    limiter.limit()
}

#[test]
fn test_healthy_feedback_converges_to_max_limit() {
    let (mut limiter, clock) = build(config().build());
    let healthy = vec![RequestOutcome::success(20.0).with_status_code(200); 10];

    let mut previous = limiter.limit();
    for _ in 0..20 {
        let limit = cycle(&mut limiter, &clock, &healthy);
        assert!(limit >= previous);
        assert!(limit <= 200);
        previous = limit;
    }

    assert_eq!(limiter.limit(), 200);
    let state = limiter.state();
    assert_eq!(state.current_limit, 200);
    assert!(matches!(state.adjustment, AdjustmentState::Increasing { .. }));
    assert_eq!(state.last_metrics.map(|m| m.success_rate), Some(1.0));
}

#[test]
fn test_failing_feedback_converges_to_min_limit() {
    let (mut limiter, clock) = build(config().build());
    let failing = vec![
        RequestOutcome::failure(4_000.0)
            .with_error_type("timeout")
            .with_status_code(504);
        10
    ];

    let mut previous = limiter.limit();
    for _ in 0..20 {
        let limit = cycle(&mut limiter, &clock, &failing);
        assert!(limit <= previous);
        assert!(limit >= 10);
        previous = limit;
    }

    assert_eq!(limiter.limit(), 10);
}

#[test]
fn test_consecutive_decreases_accelerate() {
    let (mut limiter, clock) = build(config().build());
    // 90% success at normal latency: below target, but not poor
    let mut degraded = vec![RequestOutcome::success(100.0); 9];
    degraded.push(RequestOutcome::failure(100.0));

    let mut limits = vec![limiter.limit()];
    for _ in 0..3 {
        limits.push(cycle(&mut limiter, &clock, &degraded));
    }
    let decrements: Vec<u32> = limits.windows(2).map(|w| w[0] - w[1]).collect();

    assert_eq!(limiter.adjustment(), AdjustmentState::Decreasing { streak: 3 });
    assert!(
        decrements[2] > decrements[0],
        "third decrement {} should exceed first {}",
        decrements[2],
        decrements[0]
    );
}

#[test]
fn test_no_adjustment_before_measurement_window() {
    let (mut limiter, clock) = build(config().build());

    for _ in 0..10 {
        limiter.record_request(true, 20.0, None, Some(200)).unwrap();
    }
    clock.advance_ms(999);
    limiter.consume(None, 1).unwrap();
    assert_eq!(limiter.limit(), 100);

    clock.advance_ms(1);
    limiter.consume(None, 1).unwrap();
    // Samples recorded at t=0 have aged out of the 1s measurement window
    assert_eq!(limiter.limit(), 100);
}

#[test]
fn test_per_key_rows_follow_dynamic_limit() {
    let (mut limiter, clock) = build(config().max_requests(10).limits(5, 200).build());
    let key = RateLimitKey::from("client-1");

    for _ in 0..10 {
        assert!(limiter.consume(Some(&key), 1).unwrap().allowed());
    }
    let denied = limiter.consume(Some(&key), 1).unwrap();
    assert!(!denied.allowed());
    assert_eq!(denied.limit(), 10);
    assert!(denied.retry_after() <= Duration::from_secs(1));

    clock.advance(Duration::from_secs(1));
    assert!(limiter.consume(Some(&key), 1).unwrap().allowed());
    assert_eq!(limiter.state().tracked_keys, 1);
}

#[test]
fn test_fail_closed_policy_is_configurable() {
    let clock = ManualClock::new(5_000);
    let mut limiter = AdaptiveLimiter::new(
        config().failure_policy(FailurePolicy::Closed).build(),
        clock.shared(),
    )
    .unwrap();

    clock.set_ms(1_000);
    let decision = limiter.consume(None, 1).unwrap();
    assert!(!decision.allowed());
    assert_eq!(decision.retry_after(), Duration::from_secs(1));
}

#[test]
fn test_fail_open_allows_a_trickle() {
    let clock = ManualClock::new(5_000);
    let mut limiter = AdaptiveLimiter::new(config().build(), clock.shared()).unwrap();

    clock.set_ms(1_000);
    // 10% of the base limit of 100
    let allowed = (0..50)
        .filter(|_| limiter.consume(None, 1).unwrap().allowed())
        .count();
    assert_eq!(allowed, 10);
}

#[test]
fn test_invalid_feedback_is_rejected() {
    let (mut limiter, _clock) = build(config().build());

    assert!(matches!(
        limiter.record_request(true, f64::NAN, None, None),
        Err(LimiterError::InvalidLatency(_))
    ));
    assert!(matches!(
        limiter.record_request(false, 10.0, Some("reset"), Some(700)),
        Err(LimiterError::InvalidStatusCode(700))
    ));
    assert!(limiter.record_request(false, 10.0, Some("reset"), Some(502)).is_ok());
}

#[test]
fn test_reset_restores_initial_state() {
    let (mut limiter, clock) = build(config().build());
    let initial = limiter.state();

    let healthy = vec![RequestOutcome::success(20.0); 10];
    cycle(&mut limiter, &clock, &healthy);
    limiter.consume(Some(&RateLimitKey::from(9u64)), 3).unwrap();
    assert_ne!(limiter.state(), initial);

    limiter.reset();
    assert_eq!(limiter.state(), initial);
}

#[test]
fn test_invalid_config_fails_construction() {
    let clock = ManualClock::new(0);
    let err = AdaptiveLimiter::new(config().limits(300, 200).build(), clock.shared()).unwrap_err();
    assert!(err.is_config_error());
}
