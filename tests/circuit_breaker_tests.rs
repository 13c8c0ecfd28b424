//! Circuit breaker behaviour under sequential and concurrent load

use pretty_assertions::assert_eq;
use provider_resilience::error_recovery::CircuitBreakerStats;
use provider_resilience::{
    AdvancedCircuitBreaker, CircuitBreaker, CircuitBreakerConfig, CircuitState, ProviderError,
    ResilienceError,
};
use rstest::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

async fn failing_call(breaker: &CircuitBreaker) -> Result<(), ResilienceError<ProviderError>> {
    breaker
        .execute(|| async { Err(ProviderError::service_unavailable("upstream down")) })
        .await
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(5)]
#[tokio::test]
async fn test_opens_after_exactly_max_failures(#[case] max_failures: u32) {
    let breaker = CircuitBreaker::with_params(max_failures, Duration::from_secs(60));

    for _ in 0..max_failures - 1 {
        let _ = failing_call(&breaker).await;
        assert_eq!(breaker.get_state().await, CircuitState::Closed);
    }
    let _ = failing_call(&breaker).await;
    assert_eq!(breaker.get_state().await, CircuitState::Open);
}

#[tokio::test]
async fn test_open_circuit_short_circuits_until_cooldown() {
    let breaker = CircuitBreaker::with_params(2, Duration::from_millis(80));
    for _ in 0..2 {
        let _ = failing_call(&breaker).await;
    }

    let invoked = Arc::new(AtomicU32::new(0));
    for _ in 0..5 {
        let counter = invoked.clone();
        let result: Result<(), _> = breaker
            .execute(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), ProviderError>(())
            })
            .await;
        assert!(result.unwrap_err().is_circuit_open());
    }
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    sleep(Duration::from_millis(120)).await;

    let counter = invoked.clone();
    let value = breaker
        .execute(|| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProviderError>("probe")
        })
        .await
        .unwrap();
    assert_eq!(value, "probe");
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.get_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_failed_probe_reopens() {
    let breaker = CircuitBreaker::with_params(3, Duration::from_millis(50));
    for _ in 0..3 {
        let _ = failing_call(&breaker).await;
    }
    sleep(Duration::from_millis(80)).await;

    let result = failing_call(&breaker).await;
    assert!(matches!(result, Err(ResilienceError::Operation(_))));
    assert_eq!(breaker.get_state().await, CircuitState::Open);
    assert!(failing_call(&breaker).await.unwrap_err().is_circuit_open());
}

#[rstest]
#[case::from_closed(0)]
#[case::from_partial_failures(2)]
#[case::from_open(4)]
#[tokio::test]
async fn test_reset_always_closes(#[case] failures: u32) {
    let breaker = CircuitBreaker::with_params(4, Duration::from_secs(60));
    for _ in 0..failures {
        let _ = failing_call(&breaker).await;
    }

    breaker.reset().await;

    let stats = breaker.stats().await;
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failures, 0);
}

#[tokio::test]
async fn test_category_threshold_opens_before_global_limit() {
    let breaker = AdvancedCircuitBreaker::with_params(100, Duration::from_secs(60));
    breaker.set_error_threshold("timeout", 2).await;

    let first: Result<(), _> = breaker
        .execute_with_error_type(|| async { Err(ProviderError::timeout("read")) }, "timeout")
        .await;
    assert!(matches!(first, Err(ResilienceError::Operation(_))));
    assert_eq!(breaker.get_state().await, CircuitState::Closed);

    let second: Result<(), _> = breaker
        .execute_with_error_type(|| async { Err(ProviderError::timeout("read")) }, "timeout")
        .await;
    let err = second.unwrap_err();
    assert!(err.to_string().starts_with("circuit breaker opened due to timeout errors"));
    assert_eq!(breaker.get_state().await, CircuitState::Open);
    assert_eq!(breaker.stats().await.failures, 2);
}

#[tokio::test]
async fn test_category_success_resets_only_that_category() {
    let breaker = AdvancedCircuitBreaker::with_params(100, Duration::from_secs(60));
    breaker.set_error_threshold("timeout", 3).await;
    breaker.set_error_threshold("network", 3).await;

    for category in ["timeout", "timeout", "network"] {
        let _: Result<(), _> = breaker
            .execute_with_error_type(|| async { Err(ProviderError::network("reset")) }, category)
            .await;
    }
    assert_eq!(breaker.category_count("timeout").await, 2);
    assert_eq!(breaker.category_count("network").await, 1);

    let ok: Result<u8, ResilienceError<ProviderError>> = breaker
        .execute_with_error_type(|| async { Ok(1) }, "timeout")
        .await;
    assert_eq!(ok.unwrap(), 1);
    assert_eq!(breaker.category_count("timeout").await, 0);
    assert_eq!(breaker.category_count("network").await, 1);
    assert_eq!(breaker.get_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_advanced_reset_clears_categories_and_keeps_thresholds() {
    let breaker = AdvancedCircuitBreaker::with_params(100, Duration::from_secs(60));
    breaker.set_error_threshold("rate_limit", 1).await;

    let _: Result<(), _> = breaker
        .execute_with_error_type(|| async { Err(ProviderError::rate_limit("busy")) }, "rate_limit")
        .await;
    assert_eq!(breaker.get_state().await, CircuitState::Open);

    breaker.reset().await;
    assert_eq!(breaker.get_state().await, CircuitState::Closed);
    assert_eq!(breaker.category_count("rate_limit").await, 0);

    let again: Result<(), _> = breaker
        .execute_with_error_type(|| async { Err(ProviderError::rate_limit("busy")) }, "rate_limit")
        .await;
    assert!(matches!(again, Err(ResilienceError::CategoryTripped { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_consistent_state() {
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        max_failures: 10,
        reset_timeout: Duration::from_secs(60),
    }));
    let invoked = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let breaker = breaker.clone();
        let invoked = invoked.clone();
        handles.push(tokio::spawn(async move {
            breaker
                .execute(|| async move {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Err::<(), _>(ProviderError::network("reset"))
                })
                .await
        }));
    }

    let mut rejected = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap_err().is_circuit_open() {
            rejected += 1;
        }
    }

    // The check and the update happen under one lock, so exactly
    // `max_failures` calls get through before the circuit opens.
    assert_eq!(invoked.load(Ordering::SeqCst), 10);
    assert_eq!(rejected, 40);

    let stats = breaker.stats().await;
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.total_requests, 50);
    assert_eq!(stats.blocked_requests, 40);
    assert_eq!(stats.circuit_open_count, 1);
}

#[tokio::test]
async fn test_stats_serialize() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig::critical_service());
    let _ = failing_call(&breaker).await;

    let stats = breaker.stats().await;
    assert!(stats.last_failure.is_some());

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["failures"], 1);
    assert_eq!(json["state"], "Closed");

    let back: CircuitBreakerStats = serde_json::from_value(json).unwrap();
    assert_eq!(back, stats);
}
