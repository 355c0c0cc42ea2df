//! Harness configuration.
//!
//! Everything that shapes a run is passed in explicitly, either built in code or
//! loaded from TOML. Nothing is read from environment variables.
//!
//! ```
//! use comparo::HarnessConfig;
//!
//! let config = HarnessConfig::from_toml_str(r#"
//!     trials = 50
//!     metrics = ["elapsed_time", "instructions"]
//! "#).unwrap();
//!
//! assert_eq!(config.trials, Some(50));
//! assert_eq!(config.metric_request().unwrap().metrics().len(), 2);
//! ```
use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    error::Result,
    metric::MetricRequest,
    runner::{DEFAULT_MAX_TRIALS, DEFAULT_TIME_FLOOR, TrialCount, TrialRunner},
};

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct HarnessConfig {
    /// Measured trials per operation. `None` picks the count automatically.
    pub trials: Option<usize>,
    /// Minimum total time a calibration batch must reach in automatic mode.
    pub time_floor_ms: u64,
    /// Upper bound on the automatic trial count.
    pub max_trials: usize,
    /// Metric names, see [`crate::Metric::name`].
    pub metrics: Vec<String>,
    /// Warn when turbo boost is enabled before running.
    pub check_environment: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            trials: None,
            time_floor_ms: DEFAULT_TIME_FLOOR.as_millis() as u64,
            max_trials: DEFAULT_MAX_TRIALS,
            metrics: vec!["elapsed_time".to_owned()],
            check_environment: false,
        }
    }
}

impl HarnessConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trials == Some(0) {
            return Err(ConfigError::Invalid("trials must be at least 1".into()));
        }
        if self.time_floor_ms == 0 {
            return Err(ConfigError::Invalid("time_floor_ms must be positive".into()));
        }
        if self.max_trials == 0 {
            return Err(ConfigError::Invalid("max_trials must be at least 1".into()));
        }
        MetricRequest::from_names(&self.metrics)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn trial_count(&self) -> TrialCount {
        match self.trials {
            Some(n) => TrialCount::Fixed(n),
            None => TrialCount::Auto,
        }
    }

    pub fn metric_request(&self) -> Result<MetricRequest> {
        MetricRequest::from_names(&self.metrics)
    }

    /// A runner with these settings and the platform's counter backend.
    pub fn runner(&self) -> TrialRunner {
        TrialRunner::builder()
            .trials(self.trial_count())
            .time_floor(Duration::from_millis(self.time_floor_ms))
            .max_trials(self.max_trials)
            .check_environment(self.check_environment)
            .build()
    }
}
