//! YAML configuration parsing.
//!
//! Parses the pipeline configuration (`userflow.yaml`). Every field has a
//! default, so an empty document yields the reference pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::core::retry::RetryPolicy;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// DAG identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Where records come from.
    pub source: SourceConfig,
    /// Where records go.
    pub broker: BrokerConfig,
    /// Minimum seconds a successful publish step occupies.
    pub publish_interval_secs: u64,
    /// Retry policy applied to every task.
    pub retry: RetryConfig,
    /// Maximum concurrent task attempts.
    pub max_concurrent_tasks: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            id: "user_registry".to_string(),
            name: "User registry".to_string(),
            source: SourceConfig::default(),
            broker: BrokerConfig::default(),
            publish_interval_secs: 60,
            retry: RetryConfig::default(),
            max_concurrent_tasks: 4,
        }
    }
}

impl PipelineConfig {
    /// Minimum duration of a successful publish step.
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }
}

/// HTTP record source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Endpoint returning `{"results": [user, ...]}`.
    pub url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "https://randomuser.me/api/".to_string(),
            timeout_secs: 30,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Broker (Kafka REST proxy) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Base URL of the REST proxy.
    pub url: String,
    /// Destination topic.
    pub topic: String,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8082".to_string(),
            topic: "users_created".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

impl BrokerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between attempts in seconds.
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay_secs: 60,
        }
    }
}

impl RetryConfig {
    /// Convert to the engine's retry policy.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_secs(self.delay_secs))
    }
}

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load pipeline configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<PipelineConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse pipeline configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<PipelineConfig, ConfigError> {
        let config: PipelineConfig = if yaml.trim().is_empty() {
            PipelineConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate a pipeline configuration.
    pub fn validate(config: &PipelineConfig) -> Result<(), ConfigError> {
        if config.id.trim().is_empty() {
            return Err(ConfigError::MissingField("id".into()));
        }
        if config.source.url.trim().is_empty() {
            return Err(ConfigError::MissingField("source.url".into()));
        }
        if config.broker.url.trim().is_empty() {
            return Err(ConfigError::MissingField("broker.url".into()));
        }
        if config.broker.topic.trim().is_empty() {
            return Err(ConfigError::MissingField("broker.topic".into()));
        }
        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if config.max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_concurrent_tasks cannot be zero".into(),
            ));
        }

        Ok(())
    }
}
