//! Plugin settings.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::duration;
use crate::error::{Result, SlowmodeError};

/// Prefix for environment overrides, e.g. `SLOWMODE_SCOPE=global`.
pub const ENV_PREFIX: &str = "SLOWMODE";

/// Which posts share a last-post timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// One timestamp per user in each channel
    #[default]
    PerChannel,
    /// One timestamp per user across all channels
    Global,
}

/// Main configuration for the slowmode plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowmodeConfig {
    /// How last-post times are keyed
    #[serde(default)]
    pub scope: Scope,

    /// Interval used when a channel has no usable configuration
    #[serde(default = "default_post_limit")]
    pub default_post_limit: String,

    /// Maximum number of channels with cached configuration; 0 means unbounded
    #[serde(default = "default_channel_cache_capacity")]
    pub channel_cache_capacity: usize,

    /// Rejection text when the host cannot be reached
    #[serde(default = "default_internal_error_message")]
    pub internal_error_message: String,
}

impl Default for SlowmodeConfig {
    fn default() -> Self {
        Self {
            scope: Scope::default(),
            default_post_limit: default_post_limit(),
            channel_cache_capacity: default_channel_cache_capacity(),
            internal_error_message: default_internal_error_message(),
        }
    }
}

fn default_post_limit() -> String {
    "30s".to_string()
}

fn default_channel_cache_capacity() -> usize {
    1024
}

fn default_internal_error_message() -> String {
    "An internal error has occurred.".to_string()
}

impl SlowmodeConfig {
    /// Load settings from an optional YAML file, overridden by `SLOWMODE_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading slowmode settings");
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder.add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: SlowmodeConfig = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| SlowmodeError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SlowmodeConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SlowmodeError::Config(format!("Failed to parse settings: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every field is usable.
    pub fn validate(&self) -> Result<()> {
        self.default_interval()?;
        Ok(())
    }

    /// The parsed default interval.
    pub fn default_interval(&self) -> Result<Duration> {
        duration::parse(&self.default_post_limit).map_err(|e| {
            SlowmodeError::Config(format!("default_post_limit: {}", e))
        })
    }
}
