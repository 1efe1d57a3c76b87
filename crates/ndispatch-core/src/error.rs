//! Error types for the dispatch core and the kernels it backs.
//!
//! Two families live here. [`DispatchError`] covers invariant violations of
//! the dispatch machinery itself (duplicate registration, missing baseline,
//! unknown capability names). [`KernelError`] is what a numeric kernel returns
//! for bad arguments; stubs pass it through untouched.

use thiserror::Error;

use crate::capability::CapabilityTag;

/// Result type returned by every kernel signature.
pub type KernelResult = std::result::Result<(), KernelError>;

/// Errors raised by the dispatch machinery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Two kernel modules claimed the same capability slot of one operation.
    #[error("duplicate registration: `{operation}` already has a {tag} implementation")]
    DuplicateRegistration {
        /// Operation name
        operation: &'static str,
        /// Capability slot that was claimed twice
        tag: CapabilityTag,
    },

    /// No registered implementation runs at the detected capability.
    #[error(
        "no implementation of `{operation}` runs at capability {detected} (registered: {})",
        format_tags(.registered)
    )]
    MissingBaseline {
        /// Operation name
        operation: &'static str,
        /// Capability the prober reported
        detected: CapabilityTag,
        /// Tags that were registered for the operation
        registered: Vec<CapabilityTag>,
    },

    /// A capability name did not match any known tag.
    #[error("unknown capability `{0}`; expected one of: default, avx2, avx512")]
    UnknownCapability(String),
}

impl DispatchError {
    /// Get a stable error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateRegistration { .. } => "DUPLICATE_REGISTRATION",
            Self::MissingBaseline { .. } => "MISSING_BASELINE",
            Self::UnknownCapability(_) => "UNKNOWN_CAPABILITY",
        }
    }

    /// Whether the error means the build cannot service an operation at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DuplicateRegistration { .. } | Self::MissingBaseline { .. }
        )
    }
}

fn format_tags(tags: &[CapabilityTag]) -> String {
    if tags.is_empty() {
        return "none".to_string();
    }
    tags.iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised by numeric kernels for invalid operands.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// An operand had the wrong shape or length.
    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    Shape {
        /// Which operand
        what: &'static str,
        /// Expected dimensions
        expected: Vec<usize>,
        /// Actual dimensions
        actual: Vec<usize>,
    },

    /// An argument was outside its valid domain.
    #[error("invalid argument `{name}`: {message}")]
    InvalidArgument {
        /// Argument name
        name: &'static str,
        /// What was wrong with it
        message: String,
    },
}

impl KernelError {
    /// Create a shape mismatch error.
    pub fn shape(what: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        Self::Shape {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            message: message.into(),
        }
    }

    /// Get a stable error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Shape { .. } => "SHAPE_MISMATCH",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
        }
    }
}
