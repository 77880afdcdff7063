//! Engine configuration
//!
//! Every field has a default so a partial TOML table (or none at all) yields a
//! usable configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::provider::{LogicalRole, ProviderSelection};
use crate::SleepResult;

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepConfig {
    /// Observations per history batch (default: 10)
    pub batch_size: usize,

    /// Periodic analysis interval in seconds (default: 300 = 5 minutes)
    pub analysis_interval_secs: u64,

    /// Insight application interval in seconds (default: 60)
    pub application_interval_secs: u64,

    /// Active role check interval in seconds (default: 30)
    pub role_check_interval_secs: u64,

    /// Idle time before a partial batch is flushed, in milliseconds (default: 1000)
    pub batch_flush_timeout_ms: u64,

    /// Insights below this confidence are discarded (default: 0.7)
    pub min_confidence: f64,

    /// Maximum cached insights before the oldest are evicted (default: 1000)
    pub insight_cache_capacity: usize,

    /// Thresholds that make an observation critical
    pub thresholds: CriticalThresholds,

    /// Logical role -> provider id(s)
    pub roles: BTreeMap<LogicalRole, ProviderSelection>,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            analysis_interval_secs: 300, // 5 minutes
            application_interval_secs: 60,
            role_check_interval_secs: 30,
            batch_flush_timeout_ms: 1000,
            min_confidence: 0.7,
            insight_cache_capacity: 1000,
            thresholds: CriticalThresholds::default(),
            roles: BTreeMap::new(),
        }
    }
}

/// Limits beyond which an observation skips the queue and is analyzed inline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticalThresholds {
    /// Latency in seconds (default: 10.0)
    pub latency_secs: f64,

    /// Tokens used by a single interaction (default: 10000)
    pub tokens: u64,
}

impl Default for CriticalThresholds {
    fn default() -> Self {
        Self {
            latency_secs: 10.0,
            tokens: 10_000,
        }
    }
}

impl SleepConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigValidationError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ConfigValidationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> SleepResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&content)?)
    }

    /// Route a logical role to one or more providers
    pub fn with_role(mut self, role: LogicalRole, selection: impl Into<ProviderSelection>) -> Self {
        self.roles.insert(role, selection.into());
        self
    }

    /// Set the minimum insight confidence
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_secs)
    }

    pub fn application_interval(&self) -> Duration {
        Duration::from_secs(self.application_interval_secs)
    }

    pub fn role_check_interval(&self) -> Duration {
        Duration::from_secs(self.role_check_interval_secs)
    }

    pub fn batch_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_flush_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.batch_size == 0 {
            return Err(ConfigValidationError::invalid("batch_size", "must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigValidationError::invalid(
                "min_confidence",
                "must be between 0 and 1",
            ));
        }

        if self.insight_cache_capacity == 0 {
            return Err(ConfigValidationError::invalid(
                "insight_cache_capacity",
                "must be greater than 0",
            ));
        }

        for (field, value) in [
            ("analysis_interval_secs", self.analysis_interval_secs),
            ("application_interval_secs", self.application_interval_secs),
            ("role_check_interval_secs", self.role_check_interval_secs),
            ("batch_flush_timeout_ms", self.batch_flush_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigValidationError::invalid(field, "must be greater than 0"));
            }
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigValidationError {
    fn invalid(field: &str, message: &str) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}
