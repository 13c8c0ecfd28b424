//! Status-code driven recovery planning for provider API failures
//!
//! [`RecoveryPlanner::analyze_error`] turns one failed call (error message,
//! attempt index, HTTP status and `Retry-After` hint) into a
//! [`RecoveryDecision`]. The planner is advisory: apart from fetching a fresh
//! credential on `401`, it never runs caller callbacks. Request adjustments
//! are applied by the caller through [`RecoveryPlanner::reduce_request_size`]
//! and [`RecoveryPlanner::increase_timeout`].

use crate::error_recovery::jitter::{JitterSource, ThreadRngJitter};
use crate::error_recovery::retry_policy::{capped_exponential, scale_duration};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TOKEN_LIMIT_MARKERS: [&str; 5] = ["limit", "exceeded", "maximum", "too long", "max_tokens"];
const TIMEOUT_MARKERS: [&str; 3] = ["timeout", "timed out", "deadline exceeded"];

/// Recovery planner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Attempts beyond the first that may be retried
    pub max_retries: u32,
    /// Backoff for attempt 0
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Cap applied before jitter
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Perturb delays by a uniform factor in `[0.9, 1.1]`
    pub enable_jitter: bool,
    /// Percentage the default size adjustment removes; `None` disables it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_size_percent: Option<u32>,
    /// Percentage the default timeout adjustment adds; `None` disables it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub increase_timeout_percent: Option<u32>,
}

/// Default for [`RecoveryConfig::reduce_size_percent`]
pub const DEFAULT_REDUCE_SIZE_PERCENT: u32 = 20;
/// Default for [`RecoveryConfig::increase_timeout_percent`]
pub const DEFAULT_INCREASE_TIMEOUT_PERCENT: u32 = 50;

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            enable_jitter: true,
            reduce_size_percent: Some(DEFAULT_REDUCE_SIZE_PERCENT),
            increase_timeout_percent: Some(DEFAULT_INCREASE_TIMEOUT_PERCENT),
        }
    }
}

impl RecoveryConfig {
    /// Create configuration for interactive calls (fewer retries, shorter delays)
    pub fn critical_service() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            enable_jitter: true,
            reduce_size_percent: Some(DEFAULT_REDUCE_SIZE_PERCENT),
            increase_timeout_percent: Some(DEFAULT_INCREASE_TIMEOUT_PERCENT),
        }
    }

    /// Create configuration for background work (more retries, longer delays)
    pub fn background_service() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(120),
            multiplier: 3.0,
            enable_jitter: true,
            reduce_size_percent: Some(DEFAULT_REDUCE_SIZE_PERCENT),
            increase_timeout_percent: Some(DEFAULT_INCREASE_TIMEOUT_PERCENT),
        }
    }
}

/// Recovery actions, in the order a caller would typically consider them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryAction {
    /// Simple retry
    Retry,
    /// Retry after a backoff delay
    RetryWithBackoff,
    /// Retry with a freshly resolved credential
    ReAuthenticate,
    /// Retry with a smaller request
    ReduceRequestSize,
    /// Retry with a longer timeout
    IncreaseTimeout,
    /// Stop calling the dependency for a while
    CircuitBreak,
    /// Give up
    Fail,
}

impl Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryAction::Retry => "retry",
            RecoveryAction::RetryWithBackoff => "retry_with_backoff",
            RecoveryAction::ReAuthenticate => "re_authenticate",
            RecoveryAction::ReduceRequestSize => "reduce_request_size",
            RecoveryAction::IncreaseTimeout => "increase_timeout",
            RecoveryAction::CircuitBreak => "circuit_break",
            RecoveryAction::Fail => "fail",
        };
        f.write_str(name)
    }
}

/// Credential obtained during analysis; redacted in `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Outcome of analysing one failure
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryDecision {
    /// Retry the same request after `delay`
    Retry { delay: Duration, reason: String },
    /// Retry after `delay` using `credential`
    ReAuthenticate {
        delay: Duration,
        credential: Credential,
        reason: String,
    },
    /// Retry after `delay` with a smaller request
    ReduceRequestSize { delay: Duration, reason: String },
    /// Retry after `delay` with a longer timeout
    IncreaseTimeout { delay: Duration, reason: String },
    /// Do not retry
    Fail {
        reason: String,
        /// The retry budget ran out, as opposed to a terminal error
        budget_exhausted: bool,
    },
}

impl RecoveryDecision {
    fn fail<S: Into<String>>(reason: S) -> Self {
        Self::Fail {
            reason: reason.into(),
            budget_exhausted: false,
        }
    }

    pub fn action(&self) -> RecoveryAction {
        match self {
            RecoveryDecision::Retry { .. } => RecoveryAction::RetryWithBackoff,
            RecoveryDecision::ReAuthenticate { .. } => RecoveryAction::ReAuthenticate,
            RecoveryDecision::ReduceRequestSize { .. } => RecoveryAction::ReduceRequestSize,
            RecoveryDecision::IncreaseTimeout { .. } => RecoveryAction::IncreaseTimeout,
            RecoveryDecision::Fail { .. } => RecoveryAction::Fail,
        }
    }

    pub fn should_retry(&self) -> bool {
        !matches!(self, RecoveryDecision::Fail { .. })
    }

    /// Delay to wait before the next attempt; zero for `Fail`
    pub fn retry_after(&self) -> Duration {
        match self {
            RecoveryDecision::Retry { delay, .. }
            | RecoveryDecision::ReAuthenticate { delay, .. }
            | RecoveryDecision::ReduceRequestSize { delay, .. }
            | RecoveryDecision::IncreaseTimeout { delay, .. } => *delay,
            RecoveryDecision::Fail { .. } => Duration::ZERO,
        }
    }

    pub fn new_credential(&self) -> Option<&str> {
        match self {
            RecoveryDecision::ReAuthenticate { credential, .. } => Some(credential.expose()),
            _ => None,
        }
    }

    /// Diagnostic message
    pub fn message(&self) -> &str {
        match self {
            RecoveryDecision::Retry { reason, .. }
            | RecoveryDecision::ReAuthenticate { reason, .. }
            | RecoveryDecision::ReduceRequestSize { reason, .. }
            | RecoveryDecision::IncreaseTimeout { reason, .. }
            | RecoveryDecision::Fail { reason, .. } => reason,
        }
    }

    pub fn is_budget_exhausted(&self) -> bool {
        matches!(
            self,
            RecoveryDecision::Fail {
                budget_exhausted: true,
                ..
            }
        )
    }
}

/// Source of fresh credentials after a `401`
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, cancel: &CancellationToken) -> anyhow::Result<String>;
}

/// Shrinks a request size (e.g. `max_tokens`)
pub type ReduceSizeFn = Arc<dyn Fn(u32) -> u32 + Send + Sync>;
/// Extends a request timeout
pub type IncreaseTimeoutFn = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// Parse a `Retry-After` value: delta-seconds or an HTTP date
///
/// Dates in the past yield `Duration::ZERO`. Anything else yields `None`.
pub fn parse_retry_after(raw: &str, now: SystemTime) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    httpdate::parse_http_date(raw)
        .ok()
        .map(|at| at.duration_since(now).unwrap_or(Duration::ZERO))
}

/// `current` less `percent`%, rounded down; a percent above 100 yields zero
pub fn reduce_by_percent(current: u32, percent: u32) -> u32 {
    let keep = u64::from(100u32.saturating_sub(percent));
    // keep <= 100, so the quotient never exceeds `current`
    (u64::from(current) * keep / 100) as u32
}

/// `current` plus `percent`%, saturating at `Duration::MAX`
pub fn grow_by_percent(current: Duration, percent: u32) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    let scaled = current.as_nanos() * (100 + u128::from(percent)) / 100;
    match u64::try_from(scaled / NANOS_PER_SEC) {
        Ok(secs) => Duration::new(secs, (scaled % NANOS_PER_SEC) as u32),
        Err(_) => Duration::MAX,
    }
}

fn is_token_limit_message(message: &str) -> bool {
    message.contains("token") && TOKEN_LIMIT_MARKERS.iter().any(|m| message.contains(m))
}

fn is_timeout_message(message: &str) -> bool {
    TIMEOUT_MARKERS.iter().any(|m| message.contains(m))
}

/// Decides how to recover from failed provider calls
///
/// Construct once per target and share; analysis only reads configuration.
pub struct RecoveryPlanner {
    config: RecoveryConfig,
    credential_resolver: Option<Arc<dyn CredentialResolver>>,
    reduce_size: Option<ReduceSizeFn>,
    increase_timeout: Option<IncreaseTimeoutFn>,
    jitter: Arc<dyn JitterSource>,
}

impl fmt::Debug for RecoveryPlanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryPlanner")
            .field("config", &self.config)
            .field("credential_resolver", &self.credential_resolver.is_some())
            .field("reduce_size", &self.reduce_size.is_some())
            .field("increase_timeout", &self.increase_timeout.is_some())
            .finish()
    }
}

impl Default for RecoveryPlanner {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

impl RecoveryPlanner {
    /// Create a planner without a credential resolver
    ///
    /// The adjustment callbacks are derived from the configured percentages
    /// (by default shrink requests by 20% and grow timeouts by 50%).
    pub fn new(config: RecoveryConfig) -> Self {
        let reduce_size = config.reduce_size_percent.map(|percent| {
            Arc::new(move |current: u32| reduce_by_percent(current, percent)) as ReduceSizeFn
        });
        let increase_timeout = config.increase_timeout_percent.map(|percent| {
            Arc::new(move |current: Duration| grow_by_percent(current, percent)) as IncreaseTimeoutFn
        });
        Self {
            config,
            credential_resolver: None,
            reduce_size,
            increase_timeout,
            jitter: Arc::new(ThreadRngJitter),
        }
    }

    pub fn with_credential_resolver(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.credential_resolver = Some(resolver);
        self
    }

    pub fn with_reduce_size<F>(mut self, reduce: F) -> Self
    where
        F: Fn(u32) -> u32 + Send + Sync + 'static,
    {
        self.reduce_size = Some(Arc::new(reduce));
        self
    }

    pub fn with_increase_timeout<F>(mut self, increase: F) -> Self
    where
        F: Fn(Duration) -> Duration + Send + Sync + 'static,
    {
        self.increase_timeout = Some(Arc::new(increase));
        self
    }

    /// Drop both request adjustment callbacks
    pub fn without_adjustments(mut self) -> Self {
        self.reduce_size = None;
        self.increase_timeout = None;
        self
    }

    /// Replace the jitter source
    pub fn with_jitter_source(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// `min(initial * multiplier^attempt, max)`, then jittered when enabled
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = capped_exponential(
            self.config.initial_backoff,
            self.config.multiplier,
            attempt,
            self.config.max_backoff,
        );
        if self.config.enable_jitter {
            scale_duration(base, self.jitter.factor())
        } else {
            base
        }
    }

    /// Apply the size reduction callback to the caller's current size
    pub fn reduce_request_size(&self, current: u32) -> Option<u32> {
        self.reduce_size.as_ref().map(|reduce| reduce(current))
    }

    /// Apply the timeout callback to the caller's current timeout
    pub fn increase_timeout(&self, current: Duration) -> Option<Duration> {
        self.increase_timeout.as_ref().map(|increase| increase(current))
    }

    /// Analyse one failure and decide how to recover
    ///
    /// `status` is the transport status code of this failure, if any, and
    /// `retry_after` the raw `Retry-After` header value.
    pub async fn analyze_error<E>(
        &self,
        cancel: &CancellationToken,
        error: &E,
        attempt: u32,
        status: Option<u16>,
        retry_after: Option<&str>,
    ) -> RecoveryDecision
    where
        E: Display + ?Sized,
    {
        if attempt >= self.config.max_retries {
            return RecoveryDecision::Fail {
                reason: format!("max retries ({}) exceeded", self.config.max_retries),
                budget_exhausted: true,
            };
        }

        let message = error.to_string().to_lowercase();

        let decision = match status {
            Some(401) => self.handle_unauthorized(cancel, attempt).await,
            Some(400) => self.handle_bad_request(&message, attempt),
            Some(429) => self.handle_rate_limit(attempt, retry_after),
            Some(code @ (500 | 502 | 503)) => self.handle_server_error(attempt, code),
            Some(504 | 408) => self.handle_timeout(attempt),
            _ if is_timeout_message(&message) => self.handle_timeout(attempt),
            Some(code) => {
                RecoveryDecision::fail(format!("non-retryable error: status {code}"))
            }
            None => RecoveryDecision::fail("non-retryable error: no status code"),
        };

        debug!(
            attempt,
            status = status.unwrap_or(0),
            action = %decision.action(),
            delay_ms = decision.retry_after().as_millis() as u64,
            "Recovery decision: {}",
            decision.message()
        );

        decision
    }

    async fn handle_unauthorized(
        &self,
        cancel: &CancellationToken,
        attempt: u32,
    ) -> RecoveryDecision {
        let Some(resolver) = &self.credential_resolver else {
            return RecoveryDecision::fail("no credential resolver configured");
        };

        match resolver.resolve(cancel).await {
            Ok(credential) => {
                info!("Successfully re-resolved credential");
                RecoveryDecision::ReAuthenticate {
                    delay: self.backoff(attempt),
                    credential: Credential::new(credential),
                    reason: "unauthorized - retrying with re-resolved credential".to_string(),
                }
            }
            Err(e) => {
                warn!("Failed to re-resolve credential: {e:#}");
                RecoveryDecision::fail(format!("failed to re-resolve credential: {e}"))
            }
        }
    }

    fn handle_bad_request(&self, message: &str, attempt: u32) -> RecoveryDecision {
        if is_token_limit_message(message) {
            return RecoveryDecision::ReduceRequestSize {
                delay: self.backoff(attempt),
                reason: "token limit exceeded - retry with a smaller request".to_string(),
            };
        }
        RecoveryDecision::fail("bad request - validation error")
    }

    fn handle_rate_limit(&self, attempt: u32, retry_after: Option<&str>) -> RecoveryDecision {
        let hinted = retry_after
            .and_then(|raw| parse_retry_after(raw, SystemTime::now()))
            .filter(|delay| !delay.is_zero());

        let (delay, reason) = match hinted {
            Some(delay) => (
                delay,
                format!("rate limited - respecting Retry-After of {}s", delay.as_secs()),
            ),
            None => (
                self.backoff(attempt),
                "rate limited - applying exponential backoff".to_string(),
            ),
        };

        RecoveryDecision::Retry {
            delay: delay.min(self.config.max_backoff),
            reason,
        }
    }

    fn handle_server_error(&self, attempt: u32, status: u16) -> RecoveryDecision {
        RecoveryDecision::Retry {
            delay: self.backoff(attempt),
            reason: format!("server error {status} - retrying with exponential backoff"),
        }
    }

    fn handle_timeout(&self, attempt: u32) -> RecoveryDecision {
        RecoveryDecision::IncreaseTimeout {
            delay: self.backoff(attempt),
            reason: "timeout - retry with a longer timeout".to_string(),
        }
    }
}
