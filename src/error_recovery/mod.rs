//! Error recovery patterns for provider calls
//!
//! This module provides backoff policies, circuit breakers, and a
//! status-code driven recovery planner with its retry loop.

pub mod circuit_breaker;
pub mod fallback;
pub mod jitter;
pub mod orchestrator;
pub mod recovery_planner;
pub mod retry_policy;

// Re-export commonly used types
pub use circuit_breaker::{
    AdvancedCircuitBreaker, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats,
    CircuitState,
};
pub use fallback::{fallback, fallback_value, FallbackOutcome};
pub use jitter::{FixedJitter, JitterSource, SeededJitter, ThreadRngJitter};
pub use orchestrator::Attempt;
pub use recovery_planner::{
    grow_by_percent, parse_retry_after, reduce_by_percent, Credential, CredentialResolver,
    RecoveryAction, RecoveryConfig, RecoveryDecision, RecoveryPlanner,
    DEFAULT_INCREASE_TIMEOUT_PERCENT, DEFAULT_REDUCE_SIZE_PERCENT,
};
pub use retry_policy::{
    retry, retry_with_recovery, BackoffConfig, BackoffPolicy, ExponentialBackoff, LinearBackoff,
    RetryConfig,
};
