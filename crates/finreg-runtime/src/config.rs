//! Runtime configuration.
//!
//! Loaded from YAML; every field has a default so a partial file is valid.
//! Durations are written in human-readable form (`"60s"`, `"500ms"`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use finreg_core::{Regime, ThresholdError, Thresholds};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::CompletionConfig;

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250514";

/// Errors from configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid thresholds: {0}")]
    Thresholds(#[from] ThresholdError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Retry policy for generation calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per item, including the first
    pub max_attempts: u32,

    /// First backoff delay
    #[serde(with = "duration_human")]
    pub min_backoff: Duration,

    /// Upper bound for a single backoff delay
    #[serde(with = "duration_human")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Configuration of an audit run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Model identifier passed to the generator and recorded in reports
    pub model: String,

    pub regime: Regime,

    pub thresholds: Thresholds,

    /// Items assessed concurrently
    pub fan_out: usize,

    /// Chunks requested per retrieval
    pub top_k: usize,

    /// Per-attempt generation timeout
    #[serde(with = "duration_human")]
    pub generation_timeout: Duration,

    pub retry: RetryConfig,

    pub max_tokens: u32,

    pub temperature: f32,

    /// Where section checkpoints are written; none disables checkpointing
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            regime: Regime::default(),
            thresholds: Thresholds::default(),
            fan_out: 4,
            top_k: 8,
            generation_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
            max_tokens: 2048,
            temperature: 0.1,
            checkpoint_dir: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        if self.fan_out == 0 {
            return Err(ConfigError::Invalid("fan_out must be at least 1".to_string()));
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.min_backoff > self.retry.max_backoff {
            return Err(ConfigError::Invalid(
                "retry.min_backoff must not exceed retry.max_backoff".to_string(),
            ));
        }
        if self.generation_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "generation_timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Completion settings for the LLM generator.
    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: self.generation_timeout,
        }
    }
}

mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
