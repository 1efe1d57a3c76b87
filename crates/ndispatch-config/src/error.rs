//! Configuration error types.

use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// Validation error.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error.
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Missing required field.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid value.
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        /// Dotted field path
        field: String,
        /// What was wrong with it
        message: String,
    },

    /// Unsupported format.
    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),
}

fn collect_messages(prefix: &str, errors: &ValidationErrors, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(errors) => {
                let msgs: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("validation failed for {}", e.code))
                    })
                    .collect();
                out.push(format!("{}: {}", path, msgs.join(", ")));
            }
            ValidationErrorsKind::Struct(nested) => collect_messages(&path, nested, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_messages(&format!("{path}[{index}]"), nested, out);
                }
            }
        }
    }
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        let mut messages = Vec::new();
        collect_messages("", &errors, &mut messages);
        messages.sort();
        ConfigError::ValidationError(messages.join("; "))
    }
}

impl ConfigError {
    /// Create a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    /// Create an invalid value error.
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}
