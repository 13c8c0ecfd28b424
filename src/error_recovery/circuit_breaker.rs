//! Circuit breaker pattern implementation for resilient error recovery
//!
//! A breaker guards one logical dependency shared by concurrent callers. It
//! trips to `Open` after consecutive failures, fails fast during the
//! cool-down, and admits traffic again once the cool-down has elapsed.
//!
//! The whole check → transition → invoke → update sequence runs under one
//! async mutex, so concurrent callers of the same breaker are serialized.
//! [`AdvancedCircuitBreaker`] keeps its per-category counters inside the same
//! guarded state.

use crate::error::{ResilienceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - operations blocked
    Open,
    /// Circuit is half-open - cool-down elapsed, traffic admitted again
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening circuit
    pub max_failures: u32,
    /// Cool-down before the circuit admits calls again
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create configuration for critical services
    pub fn critical_service() -> Self {
        Self {
            max_failures: 3,
            reset_timeout: Duration::from_secs(10),
        }
    }

    /// Create configuration for non-critical services
    pub fn non_critical_service() -> Self {
        Self {
            max_failures: 10,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures counted by the breaker
    pub failures: u32,
    /// Total calls presented to the breaker
    pub total_requests: u64,
    /// Calls rejected without invoking the operation
    pub blocked_requests: u64,
    /// Number of transitions into `Open`
    pub circuit_open_count: u64,
    /// Last failure time
    pub last_failure: Option<DateTime<Utc>>,
}

/// State guarded by the breaker's mutex
#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    failures: u32,
    last_failure_at: Option<Instant>,
    last_failure_wall: Option<DateTime<Utc>>,
    total_requests: u64,
    blocked_requests: u64,
    circuit_open_count: u64,
    category_thresholds: HashMap<String, u32>,
    category_counts: HashMap<String, u32>,
}

impl BreakerCore {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure_at: None,
            last_failure_wall: None,
            total_requests: 0,
            blocked_requests: 0,
            circuit_open_count: 0,
            category_thresholds: HashMap::new(),
            category_counts: HashMap::new(),
        }
    }

    /// Decide whether a call may proceed, moving Open → HalfOpen lazily
    fn admit(&mut self, reset_timeout: Duration) -> bool {
        self.total_requests += 1;

        if self.state != CircuitState::Open {
            return true;
        }

        let cooled_down = self
            .last_failure_at
            .map_or(true, |at| at.elapsed() >= reset_timeout);

        if cooled_down {
            self.transition(CircuitState::HalfOpen);
            info!("Circuit breaker transitioning to half-open");
            true
        } else {
            self.blocked_requests += 1;
            debug!("Circuit breaker open, blocking request");
            false
        }
    }

    fn record_success(&mut self) {
        self.failures = 0;
        if self.state != CircuitState::Closed {
            self.transition(CircuitState::Closed);
            info!("Circuit breaker closed after successful call");
        }
    }

    fn record_failure(&mut self, max_failures: u32) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure_at = Some(Instant::now());
        self.last_failure_wall = Some(Utc::now());

        match self.state {
            CircuitState::HalfOpen => {
                self.trip();
                warn!(failures = self.failures, "Circuit breaker reopened");
            }
            CircuitState::Closed if self.failures >= max_failures => {
                self.trip();
                warn!(
                    failures = self.failures,
                    "Circuit breaker opened after consecutive failures"
                );
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    fn trip(&mut self) {
        self.transition(CircuitState::Open);
        self.circuit_open_count += 1;
    }

    fn transition(&mut self, new_state: CircuitState) {
        if self.state != new_state {
            debug!(from = %self.state, to = %new_state, "Circuit breaker state transition");
            self.state = new_state;
        }
    }

    fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state,
            failures: self.failures,
            total_requests: self.total_requests,
            blocked_requests: self.blocked_requests,
            circuit_open_count: self.circuit_open_count,
            last_failure: self.last_failure_wall,
        }
    }
}

/// Circuit breaker implementation
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    core: Mutex<BreakerCore>,
}

impl CircuitBreaker {
    /// Create new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            core: Mutex::new(BreakerCore::new()),
        }
    }

    /// Create a breaker from a failure threshold and cool-down
    pub fn with_params(max_failures: u32, reset_timeout: Duration) -> Self {
        Self::new(CircuitBreakerConfig {
            max_failures,
            reset_timeout,
        })
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` through the breaker
    ///
    /// While the circuit is open and cooling down the operation is not
    /// invoked and [`ResilienceError::CircuitOpen`] is returned. Failures of
    /// the operation come back as [`ResilienceError::Operation`].
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut core = self.core.lock().await;
        self.execute_locked(&mut core, operation).await
    }

    async fn execute_locked<T, E, F, Fut>(
        &self,
        core: &mut BreakerCore,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if !core.admit(self.config.reset_timeout) {
            return Err(ResilienceError::CircuitOpen);
        }

        match operation().await {
            Ok(value) => {
                core.record_success();
                Ok(value)
            }
            Err(error) => {
                core.record_failure(self.config.max_failures);
                Err(ResilienceError::Operation(error))
            }
        }
    }

    /// Current state, without evaluating the cool-down
    pub async fn get_state(&self) -> CircuitState {
        self.core.lock().await.state
    }

    /// Force the breaker closed with a zero failure count
    pub async fn reset(&self) {
        let mut core = self.core.lock().await;
        core.failures = 0;
        core.transition(CircuitState::Closed);
        info!("Circuit breaker reset to closed state");
    }

    /// Get current statistics
    pub async fn stats(&self) -> CircuitBreakerStats {
        self.core.lock().await.stats()
    }
}

/// Circuit breaker with independent per-category failure thresholds
///
/// Each category keeps its own consecutive-failure counter. A category that
/// reaches its threshold forces the shared circuit open even when the global
/// counter is still below `max_failures`.
#[derive(Debug)]
pub struct AdvancedCircuitBreaker {
    base: CircuitBreaker,
}

impl AdvancedCircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            base: CircuitBreaker::new(config),
        }
    }

    pub fn with_params(max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            base: CircuitBreaker::with_params(max_failures, reset_timeout),
        }
    }

    /// Register or overwrite the threshold for a category
    pub async fn set_error_threshold(&self, category: &str, threshold: u32) {
        let mut core = self.base.core.lock().await;
        core.category_thresholds
            .insert(category.to_string(), threshold);
    }

    /// Run `operation` through the breaker, attributing failures to `category`
    ///
    /// Rejections while the circuit is open do not invoke the operation but
    /// still count against the category. Once the category reaches its
    /// threshold the rejection is reported as [`ResilienceError::CategoryOpen`].
    pub async fn execute_with_error_type<T, E, F, Fut>(
        &self,
        operation: F,
        category: &str,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut core = self.base.core.lock().await;

        match self.base.execute_locked(&mut core, operation).await {
            Ok(value) => {
                core.category_counts.insert(category.to_string(), 0);
                Ok(value)
            }
            Err(ResilienceError::Operation(source)) => {
                if Self::record_category_failure(&mut core, category) {
                    Err(ResilienceError::CategoryTripped {
                        category: category.to_string(),
                        source,
                    })
                } else {
                    Err(ResilienceError::Operation(source))
                }
            }
            Err(ResilienceError::CircuitOpen) => {
                if Self::record_category_failure(&mut core, category) {
                    Err(ResilienceError::CategoryOpen {
                        category: category.to_string(),
                    })
                } else {
                    Err(ResilienceError::CircuitOpen)
                }
            }
            Err(other) => Err(other),
        }
    }

    /// Bump the category counter; true when it reached the category threshold
    fn record_category_failure(core: &mut BreakerCore, category: &str) -> bool {
        let count = {
            let count = core
                .category_counts
                .entry(category.to_string())
                .or_insert(0);
            *count = count.saturating_add(1);
            *count
        };

        match core.category_thresholds.get(category).copied() {
            Some(threshold) if count >= threshold => {
                if core.state != CircuitState::Open {
                    core.trip();
                }
                warn!(
                    category,
                    count, threshold, "Circuit breaker opened by category threshold"
                );
                true
            }
            _ => false,
        }
    }

    /// Consecutive failures recorded for `category`
    pub async fn category_count(&self, category: &str) -> u32 {
        let core = self.base.core.lock().await;
        core.category_counts.get(category).copied().unwrap_or(0)
    }

    /// Run `operation` through the shared breaker without category tracking
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.base.execute(operation).await
    }

    pub async fn get_state(&self) -> CircuitState {
        self.base.get_state().await
    }

    /// Force the breaker closed and clear every category counter
    ///
    /// Registered thresholds are kept.
    pub async fn reset(&self) {
        let mut core = self.base.core.lock().await;
        core.failures = 0;
        core.category_counts.clear();
        core.transition(CircuitState::Closed);
        info!("Advanced circuit breaker reset to closed state");
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        self.base.stats().await
    }
}
