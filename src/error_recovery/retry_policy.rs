//! Backoff policies and a generic retry loop
//!
//! A [`BackoffPolicy`] is a pure mapping from attempt index to delay plus a
//! retry/stop predicate. [`retry`] drives any policy against an async
//! operation with cancellable sleeps between attempts.

use crate::error::{ErrorClassification, ResilienceError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Strategy deciding whether and when a failed operation is retried
pub trait BackoffPolicy: Send + Sync {
    /// False once `attempt >= max_attempts()` or when the error is not retryable
    fn should_retry(&self, error: &dyn ErrorClassification, attempt: u32) -> bool {
        attempt < self.max_attempts() && error.is_retryable()
    }

    /// Delay before the attempt following `attempt`
    fn get_delay(&self, attempt: u32) -> Duration;

    /// Configured attempt cap
    fn max_attempts(&self) -> u32;
}

/// `min(initial * multiplier^attempt, max)`, truncated to whole nanoseconds
pub(crate) fn capped_exponential(
    initial: Duration,
    multiplier: f64,
    attempt: u32,
    max: Duration,
) -> Duration {
    let scaled = initial.as_nanos() as f64 * multiplier.powf(f64::from(attempt));
    if !scaled.is_finite() || scaled >= max.as_nanos() as f64 {
        return max;
    }
    if scaled <= 0.0 {
        return Duration::ZERO;
    }
    nanos_to_duration(scaled).min(max)
}

/// `delay * factor`, saturating at `Duration::MAX`
///
/// A non-finite factor is treated as `1.0`, a negative one as `0.0`.
pub(crate) fn scale_duration(delay: Duration, factor: f64) -> Duration {
    if !factor.is_finite() {
        return delay;
    }
    let scaled = delay.as_nanos() as f64 * factor;
    if scaled <= 0.0 {
        return Duration::ZERO;
    }
    nanos_to_duration(scaled)
}

fn nanos_to_duration(nanos: f64) -> Duration {
    if nanos < u64::MAX as f64 {
        Duration::from_nanos(nanos as u64)
    } else {
        Duration::try_from_secs_f64(nanos / 1e9).unwrap_or(Duration::MAX)
    }
}

/// Capped exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExponentialBackoff {
    /// Delay returned for the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound for any computed delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Attempt cap
    pub max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            max_attempts,
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn get_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }
        capped_exponential(self.initial_delay, self.multiplier, attempt, self.max_delay)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Constant delay between attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearBackoff {
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    pub max_attempts: u32,
}

impl LinearBackoff {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }
}

impl BackoffPolicy for LinearBackoff {
    fn get_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Serializable selection of a backoff policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Capped exponential growth
    Exponential(ExponentialBackoff),
    /// Fixed delay
    Linear(LinearBackoff),
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Exponential(ExponentialBackoff::default())
    }
}

impl BackoffConfig {
    /// Instantiate the configured policy
    pub fn build(&self) -> Arc<dyn BackoffPolicy> {
        match self {
            BackoffConfig::Exponential(policy) => Arc::new(policy.clone()),
            BackoffConfig::Linear(policy) => Arc::new(policy.clone()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            BackoffConfig::Exponential(policy) => policy.max_attempts,
            BackoffConfig::Linear(policy) => policy.max_attempts,
        }
    }
}

/// Hook invoked with the attempt index and the error that triggered a retry
pub type RetryHook = Arc<dyn Fn(u32, &dyn ErrorClassification) + Send + Sync>;
/// Hook invoked once with the error that ended the loop
pub type FinalErrorHook = Arc<dyn Fn(&dyn ErrorClassification) + Send + Sync>;

/// Configuration for [`retry`]
#[derive(Clone)]
pub struct RetryConfig {
    /// Backoff policy driving the loop
    pub policy: Arc<dyn BackoffPolicy>,
    /// Called before each backoff sleep
    pub on_retry: Option<RetryHook>,
    /// Called when the loop gives up
    pub on_final_error: Option<FinalErrorHook>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Arc::new(ExponentialBackoff::default()))
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.policy.max_attempts())
            .field("on_retry", &self.on_retry.is_some())
            .field("on_final_error", &self.on_final_error.is_some())
            .finish()
    }
}

impl RetryConfig {
    pub fn new(policy: Arc<dyn BackoffPolicy>) -> Self {
        Self {
            policy,
            on_retry: None,
            on_final_error: None,
        }
    }

    /// Set the retry hook
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &dyn ErrorClassification) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Set the final error hook
    pub fn on_final_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn ErrorClassification) + Send + Sync + 'static,
    {
        self.on_final_error = Some(Arc::new(hook));
        self
    }

    fn report_final(&self, error: &dyn ErrorClassification) {
        if let Some(hook) = &self.on_final_error {
            hook(error);
        }
    }
}

/// Execute `operation` under the configured backoff policy
///
/// The operation runs at least once and at most `max_attempts()` times. A
/// non-retryable error stops the loop immediately; cancellation is checked
/// before every attempt and raced against every sleep.
pub async fn retry<T, E, F, Fut>(
    cancel: &CancellationToken,
    mut operation: F,
    config: &RetryConfig,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: ErrorClassification,
{
    let max_attempts = config.policy.max_attempts().max(1);
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }

        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !config.policy.should_retry(&error, attempt) {
            config.report_final(&error);
            if error.is_retryable() {
                warn!(attempts = attempt + 1, "Retry budget spent: {}", error);
                return Err(ResilienceError::Exhausted {
                    attempts: attempt + 1,
                    source: error,
                });
            }
            debug!(attempt, "Error not retryable: {}", error);
            return Err(ResilienceError::NonRetryable {
                attempts: attempt + 1,
                reason: "error is not retryable".to_string(),
                source: error,
            });
        }

        if attempt + 1 >= max_attempts {
            config.report_final(&error);
            warn!(attempts = attempt + 1, "Operation failed after all attempts: {}", error);
            return Err(ResilienceError::Exhausted {
                attempts: attempt + 1,
                source: error,
            });
        }

        if let Some(hook) = &config.on_retry {
            hook(attempt, &error as &dyn ErrorClassification);
        }

        let delay = config.policy.get_delay(attempt);
        debug!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Retrying after backoff"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResilienceError::CancelledDuringBackoff),
            _ = sleep(delay) => {}
        }

        attempt += 1;
    }
}

/// [`retry`], then hand a final failure to `recovery`
///
/// `recovery` receives the error `retry` would have returned and decides the
/// overall outcome, e.g. by falling back to another provider. It runs for
/// every failure, cancellation included.
pub async fn retry_with_recovery<T, E, F, Fut, R, RFut>(
    cancel: &CancellationToken,
    operation: F,
    config: &RetryConfig,
    recovery: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: ErrorClassification,
    R: FnOnce(ResilienceError<E>) -> RFut,
    RFut: Future<Output = Result<T, E>>,
{
    match retry(cancel, operation, config).await {
        Ok(value) => Ok(value),
        Err(error) => {
            info!("Retries failed, running recovery: {}", error);
            recovery(error).await
        }
    }
}
