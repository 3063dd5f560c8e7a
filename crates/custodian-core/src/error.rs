//! Error types for Custodian

use crate::provider::ProviderError;

/// Result type alias using Custodian's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Custodian operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Policy validation errors, raised before any resource is fetched
    #[error("{type_name}: invalid {field}: {message}")]
    Validation {
        /// Filter or action type the error belongs to
        type_name: String,
        /// Offending field (or `type` when the type itself is unknown)
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// Fatal provider error surfaced from a remote call
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A retryable provider error outlived the retry policy
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// The last error returned by the provider
        last: ProviderError,
    },

    /// An action type that does not implement processing
    #[error("{0} does not implement process")]
    NotImplemented(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parse errors
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new validation error
    pub fn validation(
        type_name: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            type_name: type_name.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error was raised while validating a policy
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// The provider error behind this error, if any
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider(e) => Some(e),
            Self::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}
