use std::time::Duration;

use crate::workflows::engagement::scoring::{BreakerConfig, BreakerState, CircuitBreaker};

fn config() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        reset_timeout: Duration::from_millis(40),
    }
}

#[test]
fn consecutive_failures_open_the_breaker() {
    let breaker = CircuitBreaker::new("m1", config());

    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Closed);

    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);
}

#[test]
fn success_resets_the_consecutive_failure_count() {
    let breaker = CircuitBreaker::new("m1", config());

    breaker.record_failure();
    breaker.record_failure();
    breaker.record_success();
    breaker.record_failure();
    breaker.record_failure();

    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[test]
fn open_breaker_fails_fast_until_reset_timeout() {
    let breaker = CircuitBreaker::new("m1", config());
    for _ in 0..3 {
        breaker.record_failure();
    }

    let err = breaker.try_acquire().expect_err("open breaker rejects");
    assert_eq!(err.model_id, "m1");
    assert!(err.retry_after <= Duration::from_millis(40));
}

#[test]
fn reset_timeout_moves_the_breaker_to_half_open() {
    let breaker = CircuitBreaker::new("m1", config());
    for _ in 0..3 {
        breaker.record_failure();
    }
    assert_eq!(breaker.state(), BreakerState::Open);

    std::thread::sleep(Duration::from_millis(50));
    breaker.try_acquire().expect("probe allowed after timeout");
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
}

#[test]
fn successes_in_half_open_close_the_breaker() {
    let breaker = CircuitBreaker::new("m1", config());
    for _ in 0..3 {
        breaker.record_failure();
    }
    std::thread::sleep(Duration::from_millis(50));
    breaker.try_acquire().expect("probe allowed");

    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[test]
fn any_failure_in_half_open_reopens_the_breaker() {
    let breaker = CircuitBreaker::new("m1", config());
    for _ in 0..3 {
        breaker.record_failure();
    }
    std::thread::sleep(Duration::from_millis(50));
    breaker.try_acquire().expect("probe allowed");
    assert_eq!(breaker.state(), BreakerState::HalfOpen);

    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);
}

#[test]
fn counters_reset_on_transition() {
    let breaker = CircuitBreaker::new("m1", config());
    for _ in 0..3 {
        breaker.record_failure();
    }
    std::thread::sleep(Duration::from_millis(50));
    breaker.try_acquire().expect("probe allowed");
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);

    // Back through half-open: the success counter must start from zero.
    std::thread::sleep(Duration::from_millis(50));
    breaker.try_acquire().expect("probe allowed");
    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[test]
fn administrative_reset_closes_the_breaker() {
    let breaker = CircuitBreaker::new("m1", config());
    for _ in 0..3 {
        breaker.record_failure();
    }
    assert_eq!(breaker.state(), BreakerState::Open);

    breaker.reset();
    assert_eq!(breaker.state(), BreakerState::Closed);
    breaker.try_acquire().expect("closed breaker admits calls");
}
