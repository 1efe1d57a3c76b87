//! Configuration validation.

use crate::error::ConfigError;
use crate::Config;

/// Log levels accepted without a target directive.
pub const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Log output formats.
pub const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Validate a configuration.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_logging_config(config)?;

    Ok(())
}

/// Validate logging configuration.
fn validate_logging_config(config: &Config) -> Result<(), ConfigError> {
    let level = config.logging.level.trim();
    if level.is_empty() {
        return Err(ConfigError::missing_field("logging.level"));
    }
    if !is_filter_directive(level) && !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
        return Err(ConfigError::invalid_value(
            "logging.level",
            format!(
                "must be one of: {} or a filter directive such as `ndispatch=debug`",
                LOG_LEVELS.join(", ")
            ),
        ));
    }

    let format = config.logging.format.to_lowercase();
    if !LOG_FORMATS.contains(&format.as_str()) {
        return Err(ConfigError::invalid_value(
            "logging.format",
            format!("must be one of: {}", LOG_FORMATS.join(", ")),
        ));
    }

    Ok(())
}

/// Whether `level` looks like an `EnvFilter` directive (`target=level`, lists).
pub fn is_filter_directive(level: &str) -> bool {
    level.contains('=') || level.contains(',')
}
