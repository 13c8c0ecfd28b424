//! TOML-backed settings for the resilience components
//!
//! Every table is optional; missing tables and fields take their defaults.
//!
//! ```toml
//! [recovery]
//! max_retries = 4
//! initial_backoff = "500ms"
//! max_backoff = "30s"
//! multiplier = 2.0
//! enable_jitter = true
//! reduce_size_percent = 20
//! increase_timeout_percent = 50
//!
//! [circuit_breaker]
//! max_failures = 5
//! reset_timeout = "30s"
//!
//! [backoff]
//! kind = "linear"
//! delay = "1s"
//! max_attempts = 3
//! ```

use crate::error_recovery::circuit_breaker::CircuitBreakerConfig;
use crate::error_recovery::recovery_planner::RecoveryConfig;
use crate::error_recovery::retry_policy::BackoffConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading and validation failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Settings for all resilience components
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub recovery: RecoveryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub backoff: BackoffConfig,
}

impl ResilienceSettings {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject values that would make delays shrink or a breaker never close
    pub fn validate(&self) -> Result<(), ConfigError> {
        let recovery = &self.recovery;
        check_multiplier("recovery.multiplier", recovery.multiplier)?;
        check_bounds(
            "recovery",
            recovery.initial_backoff,
            recovery.max_backoff,
        )?;
        if let Some(percent) = recovery.reduce_size_percent {
            check_percent("recovery.reduce_size_percent", percent, 1..=99)?;
        }
        if let Some(percent) = recovery.increase_timeout_percent {
            check_percent("recovery.increase_timeout_percent", percent, 1..=u32::MAX)?;
        }

        if self.circuit_breaker.max_failures == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.max_failures must be at least 1".to_string(),
            ));
        }

        if let BackoffConfig::Exponential(policy) = &self.backoff {
            check_multiplier("backoff.multiplier", policy.multiplier)?;
            check_bounds("backoff", policy.initial_delay, policy.max_delay)?;
        }

        Ok(())
    }
}

fn check_multiplier(field: &str, multiplier: f64) -> Result<(), ConfigError> {
    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(ConfigError::Invalid(format!(
            "{field} must be a finite value >= 1.0, got {multiplier}"
        )));
    }
    Ok(())
}

fn check_percent(
    field: &str,
    percent: u32,
    allowed: RangeInclusive<u32>,
) -> Result<(), ConfigError> {
    if !allowed.contains(&percent) {
        return Err(ConfigError::Invalid(format!(
            "{field} must be between {} and {}, got {percent}",
            allowed.start(),
            allowed.end()
        )));
    }
    Ok(())
}

fn check_bounds(table: &str, initial: Duration, max: Duration) -> Result<(), ConfigError> {
    if max < initial {
        return Err(ConfigError::Invalid(format!(
            "{table}: max delay {max:?} is shorter than initial delay {initial:?}"
        )));
    }
    Ok(())
}
