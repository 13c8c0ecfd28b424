//! Test fixtures and utilities for consistent test setup
//!
//! Provides deterministic planner configurations, scripted credential
//! resolvers and operations that fail a fixed number of times.

use async_trait::async_trait;
use provider_resilience::error_recovery::{CredentialResolver, FixedJitter, RecoveryPlanner};
use provider_resilience::{ProviderError, RecoveryConfig};
use rstest::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Recovery configuration with jitter off and millisecond delays
#[fixture]
pub fn deterministic_config() -> RecoveryConfig {
    RecoveryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(200),
        multiplier: 2.0,
        enable_jitter: false,
        ..RecoveryConfig::default()
    }
}

/// Planner built from [`deterministic_config`]
#[fixture]
pub fn planner(deterministic_config: RecoveryConfig) -> RecoveryPlanner {
    RecoveryPlanner::new(deterministic_config).with_jitter_source(Arc::new(FixedJitter(0.5)))
}

/// Resolver that always hands out the same key
pub struct StaticResolver(pub &'static str);

#[async_trait]
impl CredentialResolver for StaticResolver {
    async fn resolve(
        &self,
        _cancel: &tokio_util::sync::CancellationToken,
    ) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

/// Resolver whose backing store is unreachable
pub struct UnreachableResolver;

#[async_trait]
impl CredentialResolver for UnreachableResolver {
    async fn resolve(
        &self,
        _cancel: &tokio_util::sync::CancellationToken,
    ) -> anyhow::Result<String> {
        anyhow::bail!("secret store unreachable")
    }
}

/// Operation that fails with a scripted error until `failures` calls have
/// been made, then succeeds
pub struct FlakyOperation {
    calls: AtomicU32,
    failures: u32,
    status: u16,
}

impl FlakyOperation {
    pub fn new(failures: u32, status: u16) -> Self {
        Self {
            calls: AtomicU32::new(0),
            failures,
            status,
        }
    }

    pub fn always_failing(status: u16) -> Self {
        Self::new(u32::MAX, status)
    }

    pub fn call(&self) -> Result<&'static str, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(ProviderError::http(self.status, "scripted failure"))
        } else {
            Ok("ok")
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}
