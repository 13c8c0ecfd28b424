//! Retry loop driven by [`RecoveryPlanner`] decisions

use crate::error::{ResilienceError, Result};
use crate::error_recovery::recovery_planner::{RecoveryDecision, RecoveryPlanner};
use std::fmt::Display;
use std::future::Future;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Context handed to each invocation of the guarded operation
#[derive(Debug, Clone)]
pub struct Attempt {
    /// Zero-based attempt index
    pub number: u32,
    /// Cancellation signal for the whole execution
    pub cancel: CancellationToken,
    /// Decision that scheduled this attempt; `None` on the first one
    pub previous: Option<RecoveryDecision>,
}

impl Attempt {
    pub fn is_retry(&self) -> bool {
        self.number > 0
    }

    /// Credential resolved after the preceding `401`, if any
    pub fn credential(&self) -> Option<&str> {
        self.previous.as_ref().and_then(RecoveryDecision::new_credential)
    }
}

impl RecoveryPlanner {
    /// Run `operation` until it succeeds, the planner declines, the budget
    /// runs out or `cancel` fires
    ///
    /// `status_code_of` and `retry_after_of` describe the failure just
    /// returned by the operation. The operation runs at most
    /// `max_retries + 1` times and no delay follows the final attempt.
    pub async fn execute_with_recovery<T, E, F, Fut, S, R>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
        status_code_of: S,
        retry_after_of: R,
    ) -> Result<T, E>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
        S: Fn(&E) -> Option<u16>,
        R: Fn(&E) -> Option<String>,
    {
        let max_retries = self.config().max_retries;
        let mut previous: Option<RecoveryDecision> = None;
        let mut attempt: u32 = 0;

        // Terminates: the planner fails every attempt at or past `max_retries`.
        loop {
            if cancel.is_cancelled() {
                return Err(ResilienceError::Cancelled);
            }

            if attempt > 0 {
                debug!("Retry attempt {}/{}", attempt, max_retries);
            }

            let context = Attempt {
                number: attempt,
                cancel: cancel.clone(),
                previous: previous.take(),
            };

            let error = match operation(context).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "Operation recovered");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let status = status_code_of(&error);
            let retry_after = retry_after_of(&error);
            let decision = self
                .analyze_error(cancel, &error, attempt, status, retry_after.as_deref())
                .await;

            if decision.is_budget_exhausted() {
                warn!(attempts = attempt + 1, "Recovery attempts exhausted: {}", error);
                return Err(ResilienceError::Exhausted {
                    attempts: attempt + 1,
                    source: error,
                });
            }

            if !decision.should_retry() {
                debug!(attempt, "Not recoverable: {}", decision.message());
                return Err(ResilienceError::NonRetryable {
                    attempts: attempt + 1,
                    reason: decision.message().to_string(),
                    source: error,
                });
            }

            let delay = decision.retry_after();
            debug!(
                attempt,
                action = %decision.action(),
                delay_ms = delay.as_millis() as u64,
                "Waiting before next attempt"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResilienceError::CancelledDuringBackoff),
                _ = sleep(delay) => {}
            }

            previous = Some(decision);
            attempt += 1;
        }
    }
}
