//! Coordinator configuration.
//!
//! Values come from the builder methods or from environment variables via
//! [`CoordinatorConfig::from_env`]. Unset variables fall back to defaults.

use crate::backoff::{BackoffPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default margin before expiry at which a token stops being handed out.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(60);

/// Default minimum spacing between attempt starts while the token is fresh.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Default upper bound on one provider refresh call.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default store key holding the raw token.
pub const DEFAULT_TOKEN_KEY: &str = "auth.access_token";

/// Default store key holding the session metadata JSON.
pub const DEFAULT_SESSION_KEY: &str = "auth.session";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidValue(String),
}

/// Tuning for a [`RefreshCoordinator`](crate::coordinator::RefreshCoordinator).
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Tokens expiring within this margin are treated as stale.
    pub refresh_buffer: Duration,
    /// A fresh token obtained by an attempt started less than this long ago
    /// is returned without another attempt.
    pub min_refresh_interval: Duration,
    /// Maximum time one provider refresh may take.
    pub refresh_timeout: Duration,
    /// Delay after the first failure.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_max: Duration,
    /// Fraction of each backoff delay that may be randomly shaved off.
    pub backoff_jitter: f64,
    /// Store key for the raw token.
    pub token_key: String,
    /// Store key for the session metadata.
    pub session_key: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
            backoff_jitter: 0.0,
            token_key: DEFAULT_TOKEN_KEY.to_string(),
            session_key: DEFAULT_SESSION_KEY.to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Configuration with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Margin before expiry at which a token counts as stale.
    #[must_use]
    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// Minimum spacing between attempt starts while the token is fresh.
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Upper bound on one provider refresh call. Must be non-zero.
    #[must_use]
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Set the backoff curve. `max` below `base` is raised to `base`.
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max.max(base);
        self
    }

    /// Fraction (0.0 to 1.0) of each backoff delay that may be shaved off.
    #[must_use]
    pub fn with_backoff_jitter(mut self, fraction: f64) -> Self {
        self.backoff_jitter = fraction;
        self
    }

    /// Override the store keys used for persistence.
    #[must_use]
    pub fn with_store_keys(
        mut self,
        token_key: impl Into<String>,
        session_key: impl Into<String>,
    ) -> Self {
        self.token_key = token_key.into();
        self.session_key = session_key.into();
        self
    }

    /// The backoff policy described by this configuration.
    #[must_use]
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_base, self.backoff_max).with_jitter(self.backoff_jitter)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a zero refresh timeout, a
    /// backoff ceiling below its base, or identical store keys.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "refresh timeout must be greater than 0".to_string(),
            ));
        }
        if self.backoff_max < self.backoff_base {
            return Err(ConfigError::InvalidValue(format!(
                "backoff max ({:?}) must not be below backoff base ({:?})",
                self.backoff_max, self.backoff_base
            )));
        }
        if self.token_key == self.session_key {
            return Err(ConfigError::InvalidValue(format!(
                "token key and session key must differ, both are '{}'",
                self.token_key
            )));
        }
        Ok(())
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`CoordinatorConfig::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the variable when a value
    /// does not parse, or when the result fails [`CoordinatorConfig::validate`].
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let refresh_buffer = parse_u64(vars, "CREDENTIAL_REFRESH_BUFFER_SECONDS")?
            .map_or(defaults.refresh_buffer, Duration::from_secs);

        let min_refresh_interval = parse_u64(vars, "CREDENTIAL_MIN_REFRESH_INTERVAL_SECONDS")?
            .map_or(defaults.min_refresh_interval, Duration::from_secs);

        let refresh_timeout = parse_u64(vars, "CREDENTIAL_REFRESH_TIMEOUT_SECONDS")?
            .map_or(defaults.refresh_timeout, Duration::from_secs);

        let backoff_base = parse_u64(vars, "CREDENTIAL_BACKOFF_BASE_MS")?
            .map_or(defaults.backoff_base, Duration::from_millis);

        let backoff_max = parse_u64(vars, "CREDENTIAL_BACKOFF_MAX_MS")?
            .map_or(defaults.backoff_max, Duration::from_millis);

        let token_key = vars
            .get("CREDENTIAL_TOKEN_KEY")
            .cloned()
            .unwrap_or(defaults.token_key);

        let session_key = vars
            .get("CREDENTIAL_SESSION_KEY")
            .cloned()
            .unwrap_or(defaults.session_key);

        let config = Self {
            refresh_buffer,
            min_refresh_interval,
            refresh_timeout,
            backoff_base,
            backoff_max,
            backoff_jitter: defaults.backoff_jitter,
            token_key,
            session_key,
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_u64(vars: &HashMap<String, String>, name: &str) -> Result<Option<u64>, ConfigError> {
    vars.get(name)
        .map(|value_str| {
            value_str.trim().parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "{name} must be a valid non-negative integer, got '{value_str}': {e}"
                ))
            })
        })
        .transpose()
}
