//! ndispatch Configuration Management.
//!
//! This crate provides configuration loading and validation for the ndispatch
//! kernel dispatcher. It supports YAML, TOML, and JSON configuration files,
//! as well as environment variable overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use ndispatch_config::{Config, ConfigLoader};
//!
//! let config = ConfigLoader::new()
//!     .with_file("ndispatch.yaml")
//!     .with_env_prefix("NDISPATCH")
//!     .load()?;
//!
//! println!("Capability ceiling: {:?}", config.dispatch.capability);
//! ```

pub mod error;
pub mod loader;
pub mod validation;

pub use error::ConfigError;
pub use loader::{load_default_config, ConfigBuilder, ConfigFormat, ConfigLoader};

use ndispatch_core::CapabilityTag;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Environment prefix used by [`load_default_config`].
pub const ENV_PREFIX: &str = "NDISPATCH";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Dispatch configuration.
    #[validate(nested)]
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Logging configuration.
    #[validate(nested)]
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Create a new configuration from file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        ConfigLoader::new().with_file(path).load()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        <Self as Validate>::validate(self).map_err(ConfigError::from)?;
        validation::validate_config(self)
    }
}

/// Dispatch configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct DispatchConfig {
    /// Highest capability stubs may select. `None` means whatever the host
    /// supports.
    #[serde(default)]
    pub capability: Option<CapabilityTag>,

    /// Resolve every stub at startup instead of on first call.
    #[serde(default)]
    pub eager: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive.
    #[serde(default = "default_log_level")]
    #[validate(length(min = 1))]
    pub level: String,

    /// Log format (json, pretty, compact).
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
