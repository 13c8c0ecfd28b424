//! Fallback helpers for degraded operation

use std::future::Future;
use tracing::info;

/// Value produced by [`fallback_value`]
///
/// `primary_error` is set whenever `value` is the fallback rather than the
/// primary result.
#[derive(Debug)]
pub struct FallbackOutcome<T, E> {
    pub value: T,
    pub primary_error: Option<E>,
}

impl<T, E> FallbackOutcome<T, E> {
    pub fn is_fallback(&self) -> bool {
        self.primary_error.is_some()
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Run `primary`; on failure run `secondary` and return its result instead
///
/// `secondary` is never invoked when `primary` succeeds.
pub async fn fallback<T, E, P, PFut, S, SFut>(primary: P, secondary: S) -> Result<T, E>
where
    P: FnOnce() -> PFut,
    PFut: Future<Output = Result<T, E>>,
    S: FnOnce() -> SFut,
    SFut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match primary().await {
        Ok(value) => Ok(value),
        Err(e) => {
            info!("Primary operation failed, using fallback: {}", e);
            secondary().await
        }
    }
}

/// Run `primary`; on failure return `default` together with the error
pub async fn fallback_value<T, E, P, PFut>(primary: P, default: T) -> FallbackOutcome<T, E>
where
    P: FnOnce() -> PFut,
    PFut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match primary().await {
        Ok(value) => FallbackOutcome {
            value,
            primary_error: None,
        },
        Err(e) => {
            info!("Primary operation failed, using default value: {}", e);
            FallbackOutcome {
                value: default,
                primary_error: Some(e),
            }
        }
    }
}
