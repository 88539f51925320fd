//! Error types for the stack deployment system.
//!
//! This module provides the error hierarchy for every phase of a deployment:
//! configuration, asset synchronization, change-set negotiation, stack
//! reconciliation and the raw provider failures they wrap.

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the deployment system.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Asset synchronization errors.
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// Stack and change-set errors.
    #[error("Stack error: {0}")]
    Stack(#[from] StackError),

    /// A provider error that was not recognized by any recovery path.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
///
/// All of these are raised before any call reaches the provider.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// No deployment bucket was configured.
    #[error("A deployment bucket is required (deployment.bucket)")]
    MissingBucket,

    /// The requested change-set type conflicts with the import list.
    #[error("Change set type {requested} conflicts with the import configuration: {reason}")]
    ConflictingChangeSetType {
        /// The requested change-set type.
        requested: String,
        /// Why the combination is rejected.
        reason: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Type of resource (function, api, ...).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },
}

/// Asset synchronization errors.
#[derive(Debug, Error)]
pub enum AssetError {
    /// A manifest entry cannot be uploaded. The whole batch is rejected.
    #[error("Invalid manifest entry #{index}: {message}")]
    InvalidManifest {
        /// Position of the entry in the manifest.
        index: usize,
        /// What is wrong with the entry.
        message: String,
    },

    /// A local file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Local path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A local folder could not be walked.
    #[error("Failed to walk folder {path}: {message}")]
    Walk {
        /// Folder being expanded.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The plan document could not be serialized.
    #[error("Failed to serialize plan document: {message}")]
    Serialize {
        /// Description of the serialization error.
        message: String,
    },

    /// The object store rejected an operation.
    #[error("Object store error: {0}")]
    Store(#[from] ProviderError),
}

/// Stack and change-set errors.
#[derive(Debug, Error)]
pub enum StackError {
    /// A bounded polling loop ran out of attempts.
    #[error("Timed out waiting for {label} after {attempts} attempts")]
    Timeout {
        /// What was being waited for.
        label: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The change set landed in a state that can never be executed.
    #[error("Change set {change_set} was rejected: {reason}")]
    ChangeSetRejected {
        /// Change set name or id.
        change_set: String,
        /// Reason reported by the provider.
        reason: String,
    },

    /// Change-set negotiation kept hitting recoverable failures.
    #[error("Gave up negotiating a change set for stack {stack} after {rounds} rounds")]
    NegotiationExhausted {
        /// Stack name.
        stack: String,
        /// Number of create attempts made.
        rounds: u32,
    },

    /// The stack could not be deleted.
    #[error("Deletion of stack {stack} failed with status {status}")]
    DeleteFailed {
        /// Stack name.
        stack: String,
        /// Status reported by the provider.
        status: String,
    },

    /// The provider accepted a change set but returned no identifier.
    #[error("Provider returned no change set id for stack {stack}")]
    MissingChangeSetId {
        /// Stack name.
        stack: String,
    },
}

/// A failure reported by a remote provider (object store or control plane).
///
/// The `code` and `message` are kept verbatim because the change-set
/// negotiator classifies failures from them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ProviderError {
    /// Operation that failed (for example `CreateChangeSet`).
    pub operation: String,
    /// Structured error code, if the provider sent one.
    pub code: Option<String>,
    /// Human readable message as sent by the provider.
    pub message: String,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} failed ({code}): {}", self.operation, self.message),
            None => write!(f, "{} failed: {}", self.operation, self.message),
        }
    }
}

impl ProviderError {
    /// Creates a provider error without a structured code.
    #[must_use]
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            code: None,
            message: message.into(),
        }
    }

    /// Creates a provider error carrying a structured code.
    #[must_use]
    pub fn with_code(
        operation: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Converts an AWS SDK error, keeping the service code and message.
    pub(crate) fn from_sdk<E>(operation: &str, err: &E) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
    {
        let message = err
            .message()
            .map_or_else(|| DisplayErrorContext(err).to_string(), str::to_string);

        Self {
            operation: operation.to_string(),
            code: err.code().map(str::to_string),
            message,
        }
    }
}

/// Result type alias for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the error was raised before touching the provider.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Asset(AssetError::InvalidManifest { .. })
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl AssetError {
    /// Creates a manifest error for the entry at `index`.
    #[must_use]
    pub fn manifest(index: usize, message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            index,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::with_code("CreateChangeSet", "AlreadyExistsException", "exists");
        assert_eq!(
            err.to_string(),
            "CreateChangeSet failed (AlreadyExistsException): exists"
        );

        let err = ProviderError::new("DescribeStacks", "Stack [app] does not exist");
        assert_eq!(
            err.to_string(),
            "DescribeStacks failed: Stack [app] does not exist"
        );
    }

    #[test]
    fn test_configuration_errors_are_flagged() {
        assert!(DeployError::from(ConfigError::MissingBucket).is_configuration());
        assert!(DeployError::from(AssetError::manifest(2, "no source")).is_configuration());
        assert!(!DeployError::internal("boom").is_configuration());
    }
}
