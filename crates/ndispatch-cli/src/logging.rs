//! Tracing setup for the CLI.

use anyhow::{Context, Result};
use ndispatch_config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level or `EnvFilter` directive.
    pub filter: String,

    /// Log format.
    pub format: LogFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl TracingConfig {
    /// Derive tracing settings from the logging section of the configuration.
    pub fn from_logging(logging: &LoggingConfig) -> Self {
        Self {
            filter: logging.level.clone(),
            format: LogFormat::parse(&logging.format),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format.
    Pretty,

    /// Compact format.
    Compact,

    /// JSON format.
    Json,
}

impl LogFormat {
    /// Parse from string; unknown names fall back to pretty.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, takes precedence over the configured filter.
pub fn init_tracing(config: TracingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .with_context(|| format!("invalid log filter `{}`", config.filter))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_target(true).with_thread_names(true))
            .try_init(),
    };
    result.context("failed to install tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Pretty);
    }

    #[test]
    fn test_from_logging() {
        let logging = LoggingConfig {
            level: "ndispatch_core=debug".to_string(),
            format: "json".to_string(),
        };
        let config = TracingConfig::from_logging(&logging);
        assert_eq!(config.filter, "ndispatch_core=debug");
        assert_eq!(config.format, LogFormat::Json);
    }
}
