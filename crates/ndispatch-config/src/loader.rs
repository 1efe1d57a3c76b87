//! Configuration loader.

use std::path::Path;

use ndispatch_core::{parse_override, CapabilityTag};
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::{Config, DispatchConfig, LoggingConfig, ENV_PREFIX};

/// Configuration file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.yaml` / `.yml`
    Yaml,
    /// `.toml`
    Toml,
    /// `.json`
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension.
    pub fn from_extension(path: &str) -> Option<Self> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Some(Self::Yaml),
            Some("toml") => Some(Self::Toml),
            Some("json") => Some(Self::Json),
            _ => None,
        }
    }

    /// Parse content in this format.
    pub fn parse<T: serde::de::DeserializeOwned>(&self, content: &str) -> Result<T, ConfigError> {
        match self {
            Self::Yaml => serde_yaml::from_str(content).map_err(ConfigError::from),
            Self::Toml => toml::from_str(content).map_err(ConfigError::from),
            Self::Json => serde_json::from_str(content).map_err(ConfigError::from),
        }
    }
}

/// Configuration loader.
pub struct ConfigLoader {
    /// Config file path.
    file_path: Option<String>,

    /// Environment variable prefix.
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new() -> Self {
        Self {
            file_path: None,
            env_prefix: None,
        }
    }

    /// Set the config file path.
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Set the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Load the configuration.
    pub fn load(self) -> Result<Config, ConfigError> {
        let mut config = match self.file_path {
            Some(ref path) => self.load_from_file(path)?,
            None => Config::default(),
        };

        if let Some(ref prefix) = self.env_prefix {
            apply_env_overrides(&mut config, prefix, |key| std::env::var(key).ok())?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Load from file.
    fn load_from_file(&self, path: &str) -> Result<Config, ConfigError> {
        debug!("Loading configuration from {}", path);

        if !Path::new(path).exists() {
            return Err(ConfigError::FileNotFound(path.to_string()));
        }

        let content = std::fs::read_to_string(path)?;

        let format = ConfigFormat::from_extension(path)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_string()))?;

        let config: Config = format.parse(&content)?;

        info!("Loaded configuration from {}", path);

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::invalid_value(field, format!("expected a boolean, got `{raw}`"))),
    }
}

/// Apply `{prefix}_*` overrides read through `lookup`.
fn apply_env_overrides<F>(config: &mut Config, prefix: &str, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Same policy as the core's own env ceiling: a bad name is logged and
    // the configured value kept.
    let capability_key = format!("{}_CPU_CAPABILITY", prefix);
    if let Some(val) = lookup(&capability_key) {
        match parse_override(&val) {
            Ok(capability) => config.dispatch.capability = capability,
            Err(e) => {
                warn!(variable = %capability_key, error = %e, "ignoring capability override")
            }
        }
    }

    let eager_key = format!("{}_EAGER", prefix);
    if let Some(val) = lookup(&eager_key) {
        config.dispatch.eager = parse_bool(&eager_key, &val)?;
    }

    if let Some(val) = lookup(&format!("{}_LOG_LEVEL", prefix)) {
        config.logging.level = val;
    }
    if let Some(val) = lookup(&format!("{}_LOG_FORMAT", prefix)) {
        config.logging.format = val;
    }

    Ok(())
}

/// Load configuration from default locations.
pub fn load_default_config() -> Result<Config, ConfigError> {
    let paths = [
        "ndispatch.yaml",
        "ndispatch.yml",
        "ndispatch.toml",
        "ndispatch.json",
    ];

    for path in &paths {
        if Path::new(path).exists() {
            return ConfigLoader::new()
                .with_file(*path)
                .with_env_prefix(ENV_PREFIX)
                .load();
        }
    }

    ConfigLoader::new().with_env_prefix(ENV_PREFIX).load()
}

/// Builder for programmatic configuration.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new config builder.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set dispatch configuration.
    pub fn dispatch(mut self, config: DispatchConfig) -> Self {
        self.config.dispatch = config;
        self
    }

    /// Set logging configuration.
    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.config.logging = config;
        self
    }

    /// Cap the capability stubs may select.
    pub fn capability(mut self, tag: CapabilityTag) -> Self {
        self.config.dispatch.capability = Some(tag);
        self
    }

    /// Resolve every stub at startup.
    pub fn eager(mut self, eager: bool) -> Self {
        self.config.dispatch.eager = eager;
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(ConfigFormat::from_extension("a.YAML"), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_extension("a.yml"), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_extension("a.toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("a.json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("a.ini"), None);
    }

    #[test]
    fn test_load_yaml() {
        let file = write_config(
            ".yaml",
            "dispatch:\n  capability: avx2\n  eager: true\nlogging:\n  level: debug\n",
        );
        let config = ConfigLoader::new()
            .with_file(file.path().to_string_lossy())
            .load()
            .unwrap();
        assert_eq!(config.dispatch.capability, Some(CapabilityTag::Avx2));
        assert!(config.dispatch.eager);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_toml_and_json() {
        let toml = write_config(".toml", "[dispatch]\ncapability = \"default\"\n");
        let config = Config::from_file(&toml.path().to_string_lossy()).unwrap();
        assert_eq!(config.dispatch.capability, Some(CapabilityTag::Default));

        let json = write_config(".json", r#"{"logging": {"format": "json"}}"#);
        let config = Config::from_file(&json.path().to_string_lossy()).unwrap();
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_unknown_capability_in_file() {
        let file = write_config(".yaml", "dispatch:\n  capability: neon\n");
        let err = Config::from_file(&file.path().to_string_lossy()).unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)));
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let err = Config::from_file("/nonexistent/ndispatch.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));

        let file = write_config(".ini", "capability=avx2");
        let err = Config::from_file(&file.path().to_string_lossy()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TEST_CPU_CAPABILITY", "AVX512"),
            ("TEST_EAGER", "yes"),
            ("TEST_LOG_LEVEL", "trace"),
            ("TEST_LOG_FORMAT", "compact"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_env_overrides(&mut config, "TEST", |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.dispatch.capability, Some(CapabilityTag::Avx512));
        assert!(config.dispatch.eager);
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.format, "compact");
    }

    #[test]
    fn test_unknown_env_capability_is_ignored() {
        let mut config = ConfigBuilder::new()
            .capability(CapabilityTag::Avx2)
            .build()
            .unwrap();
        apply_env_overrides(&mut config, "TEST", |k| {
            (k == "TEST_CPU_CAPABILITY").then(|| "sse2".to_string())
        })
        .unwrap();
        assert_eq!(config.dispatch.capability, Some(CapabilityTag::Avx2));

        let mut config = Config::default();
        apply_env_overrides(&mut config, "TEST", |k| {
            (k == "TEST_CPU_CAPABILITY").then(|| "neon".to_string())
        })
        .unwrap();
        assert_eq!(config.dispatch.capability, None);
    }

    #[test]
    fn test_env_override_errors() {
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config, "TEST", |k| {
            (k == "TEST_EAGER").then(|| "maybe".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_empty_capability_clears_ceiling() {
        let mut config = ConfigBuilder::new()
            .capability(CapabilityTag::Avx2)
            .build()
            .unwrap();
        apply_env_overrides(&mut config, "TEST", |k| {
            (k == "TEST_CPU_CAPABILITY").then(String::new)
        })
        .unwrap();
        assert_eq!(config.dispatch.capability, None);
    }

    #[test]
    fn test_builder_validates() {
        let config = ConfigBuilder::new().eager(true).log_level("warn").build().unwrap();
        assert!(config.dispatch.eager);

        let err = ConfigBuilder::new().log_level("loud").build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
