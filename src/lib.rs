//! Resilience primitives for calls to remote provider APIs
//!
//! This crate decides how to react when a request to an LLM or similar
//! HTTP provider fails, and guards such calls against cascading failure.
//!
//! # Features
//!
//! - Exponential and linear backoff policies with a generic retry loop
//! - Circuit breaker with per-error-category thresholds
//! - Status-code driven recovery planning (re-authenticate, shrink the
//!   request, extend the timeout, honour `Retry-After`)
//! - Cancellable retry orchestration on top of the planner
//! - TOML settings and tracing setup

pub mod config;
pub mod error;
pub mod error_recovery;
pub mod logging;

// Re-export main types for convenience
pub use config::{ConfigError, ResilienceSettings};
pub use error::{ErrorClassification, ErrorSeverity, ProviderError, ResilienceError, Result};
pub use error_recovery::{
    AdvancedCircuitBreaker, Attempt, BackoffPolicy, CircuitBreaker, CircuitBreakerConfig,
    CircuitState, CredentialResolver, ExponentialBackoff, LinearBackoff, RecoveryAction,
    RecoveryConfig, RecoveryDecision, RecoveryPlanner,
};
