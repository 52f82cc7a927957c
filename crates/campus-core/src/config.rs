//! Construction-time settings for the scheduler and the response cache.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse governor config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Settings for both halves of the request governance layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
}

impl GovernorConfig {
    /// Parses a TOML document with optional `[scheduler]` and `[cache]` tables.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.cache.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on operations running at the same time.
    pub max_concurrent: usize,
    /// Minimum spacing between two dispatches.
    pub min_delay_ms: u64,
    /// Retries granted to a task unless the call overrides it.
    pub retry_attempts: u32,
    /// Backoff before the first retry; doubles for every further one.
    pub retry_base_delay_ms: u64,
    /// Give every first failure one retry, even when it is not retryable.
    pub retry_any_first_failure: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            min_delay_ms: 150,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_any_first_failure: false,
        }
    }
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.max_concurrent",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SchedulerConfigBuilder {
    inner: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.inner.max_concurrent = max_concurrent;
        self
    }

    pub fn min_delay_ms(mut self, ms: u64) -> Self {
        self.inner.min_delay_ms = ms;
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.inner.retry_attempts = attempts;
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.inner.retry_base_delay_ms = ms;
        self
    }

    pub fn retry_any_first_failure(mut self, enabled: bool) -> Self {
        self.inner.retry_any_first_failure = enabled;
        self
    }

    pub fn build(self) -> SchedulerConfig {
        self.inner
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of entries stored without an explicit TTL.
    pub default_ttl_ms: u64,
    /// Period of the background sweep that drops expired entries.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 5 * 60 * 1000,
            sweep_interval_ms: 10 * 60 * 1000,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.default_ttl_ms",
                reason: "must be greater than zero",
            });
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.sweep_interval_ms",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}
