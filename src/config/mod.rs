//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the pipeline.

mod yaml;

pub use yaml::{BrokerConfig, ConfigError, PipelineConfig, RetryConfig, SourceConfig, YamlLoader};
