//! Error types for provider resilience
//!
//! This module provides the classification contract consumed by the recovery
//! machinery, a concrete provider error type, and the error returned by the
//! circuit breakers and recovery loops.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

/// Error severity levels for monitoring and alerting
///
/// Severity is informational only and never changes a retry decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Low severity - information only
    Info,
    /// Medium severity - warning condition
    Warning,
    /// High severity - error condition
    Error,
    /// Critical severity - immediate attention required
    Critical,
}

/// Classification contract for errors handed to the recovery machinery
///
/// The message (via `Display`) is also inspected for substring heuristics
/// such as "timeout" or token-limit phrases.
pub trait ErrorClassification: Display {
    /// Whether a retry of the failed call might succeed
    fn is_retryable(&self) -> bool;

    /// Severity of the failure
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Warning
    }
}

impl<T: ErrorClassification + ?Sized> ErrorClassification for Box<T> {
    fn is_retryable(&self) -> bool {
        (**self).is_retryable()
    }

    fn severity(&self) -> ErrorSeverity {
        (**self).severity()
    }
}

/// Failures reported by a provider transport
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Service unavailable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Request rejected by the provider as malformed or too large
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Network errors
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP status failures not covered by a more specific variant
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl ProviderError {
    /// Create an authentication error
    pub fn authentication<S: Into<String>>(msg: S) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limit<S: Into<String>>(msg: S) -> Self {
        Self::RateLimit(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a service unavailable error
    pub fn service_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Create an HTTP status error
    pub fn http<S: Into<String>>(status: u16, msg: S) -> Self {
        Self::Http {
            status,
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Generic(anyhow::anyhow!(msg.into()))
    }

    /// HTTP status code carried by the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Authentication(_) => Some(401),
            ProviderError::RateLimit(_) => Some(429),
            ProviderError::ServiceUnavailable(_) => Some(503),
            ProviderError::InvalidRequest(_) => Some(400),
            ProviderError::Http { status, .. } => Some(*status),
            ProviderError::Timeout(_)
            | ProviderError::Network(_)
            | ProviderError::Config(_)
            | ProviderError::Generic(_) => None,
        }
    }

    /// Check if error indicates authentication issue
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ProviderError::Authentication(_))
            || matches!(self, ProviderError::Http { status: 401 | 403, .. })
    }
}

impl ErrorClassification for ProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimit(_)
            | ProviderError::Timeout(_)
            | ProviderError::ServiceUnavailable(_)
            | ProviderError::Network(_) => true,
            ProviderError::Http { status, .. } => {
                matches!(status, 408 | 429) || (500..=599).contains(status)
            }
            ProviderError::Authentication(_)
            | ProviderError::InvalidRequest(_)
            | ProviderError::Config(_)
            | ProviderError::Generic(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            ProviderError::Authentication(_) => ErrorSeverity::Critical,
            ProviderError::Config(_) => ErrorSeverity::Error,
            ProviderError::ServiceUnavailable(_)
            | ProviderError::Timeout(_)
            | ProviderError::Network(_)
            | ProviderError::RateLimit(_) => ErrorSeverity::Warning,
            ProviderError::InvalidRequest(_) => ErrorSeverity::Warning,
            ProviderError::Http { status, .. } if *status >= 500 => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Result type alias for guarded operations
pub type Result<T, E> = std::result::Result<T, ResilienceError<E>>;

/// Errors returned by circuit breakers and recovery loops
///
/// `E` is the error type of the guarded operation; it is carried as the
/// source wherever a failure of the operation caused the outcome.
#[derive(Error, Debug)]
pub enum ResilienceError<E> {
    /// Circuit is open and the cool-down has not elapsed
    #[error("circuit breaker is open: too many failures")]
    CircuitOpen,

    /// A category-specific threshold forced the circuit open
    #[error("circuit breaker opened due to {category} errors: {source}")]
    CategoryTripped { category: String, source: E },

    /// Rejected while open, and the rejection brought the category to its threshold
    #[error("circuit breaker opened due to {category} errors")]
    CategoryOpen { category: String },

    /// The planner declined to retry
    #[error("non-retryable error after {attempts} attempts ({reason}): {source}")]
    NonRetryable {
        attempts: u32,
        reason: String,
        source: E,
    },

    /// Every allowed attempt failed
    #[error("all attempts exhausted after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },

    /// Cancelled before an attempt started
    #[error("execution cancelled")]
    Cancelled,

    /// Cancelled while waiting out a backoff delay
    #[error("execution cancelled during backoff")]
    CancelledDuringBackoff,

    /// Failure of the guarded operation passed through unchanged
    #[error(transparent)]
    Operation(E),
}

impl<E> ResilienceError<E> {
    /// True for both cancellation variants
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ResilienceError::Cancelled | ResilienceError::CancelledDuringBackoff
        )
    }

    /// True when the attempt budget ran out
    pub fn is_exhausted(&self) -> bool {
        matches!(self, ResilienceError::Exhausted { .. })
    }

    /// True when the call was rejected without invoking the operation
    pub fn is_circuit_open(&self) -> bool {
        matches!(
            self,
            ResilienceError::CircuitOpen | ResilienceError::CategoryOpen { .. }
        )
    }

    /// Underlying operation error, if the outcome was caused by one
    pub fn source_error(&self) -> Option<&E> {
        match self {
            ResilienceError::CategoryTripped { source, .. }
            | ResilienceError::NonRetryable { source, .. }
            | ResilienceError::Exhausted { source, .. }
            | ResilienceError::Operation(source) => Some(source),
            ResilienceError::CircuitOpen
            | ResilienceError::CategoryOpen { .. }
            | ResilienceError::Cancelled
            | ResilienceError::CancelledDuringBackoff => None,
        }
    }

    /// Consume the error and return the underlying operation error, if any
    pub fn into_source(self) -> Option<E> {
        match self {
            ResilienceError::CategoryTripped { source, .. }
            | ResilienceError::NonRetryable { source, .. }
            | ResilienceError::Exhausted { source, .. }
            | ResilienceError::Operation(source) => Some(source),
            ResilienceError::CircuitOpen
            | ResilienceError::CategoryOpen { .. }
            | ResilienceError::Cancelled
            | ResilienceError::CancelledDuringBackoff => None,
        }
    }
}
