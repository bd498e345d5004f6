//! Error types for the Stratus reconciler.
//!
//! This module provides the error hierarchy for every phase of a
//! reconciliation run: declaration parsing, graph construction, state
//! management, planning, provider calls, and apply execution.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for Stratus operations.
#[derive(Debug, Error)]
pub enum StratusError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Graph construction errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State snapshot errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Apply execution errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
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

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Invalid attribute expression.
    #[error("Invalid attribute expression '{expr}': {message}")]
    InvalidExpression {
        /// The offending expression text.
        expr: String,
        /// Description of the problem.
        message: String,
    },
}

/// Graph construction errors, raised before any provider call is made.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The declared edge set contains a cycle.
    #[error("Dependency cycle detected: {cycle}")]
    Cycle {
        /// Node names along the cycle, joined by arrows.
        cycle: String,
    },

    /// An attribute or `depends_on` entry references an undeclared resource.
    #[error("Resource '{referrer}' references undeclared resource '{target}'")]
    UnresolvedReference {
        /// Name of the referencing resource.
        referrer: String,
        /// Name of the missing resource.
        target: String,
    },

    /// Two declarations share the same logical name.
    #[error("Duplicate resource name: {name}")]
    DuplicateResource {
        /// The duplicated logical name.
        name: String,
    },

    /// A resource references itself.
    #[error("Resource '{name}' depends on itself")]
    SelfReference {
        /// The self-referencing resource.
        name: String,
    },
}

/// State snapshot errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// Snapshot not found.
    #[error("State snapshot not found: {location}")]
    NotFound {
        /// Location that was queried.
        location: String,
    },

    /// Snapshot is corrupted.
    #[error("State snapshot is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The snapshot changed externally since it was read.
    #[error("Stale state: expected version {expected}, found {found}")]
    StaleState {
        /// Version the caller read.
        expected: u64,
        /// Version currently persisted.
        found: u64,
    },

    /// Backend error (filesystem, S3, ...).
    #[error("State backend error: {message}")]
    Backend {
        /// Description of the backend error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },
}

/// Errors returned by resource providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transient failure (network timeout, rate limiting). Retried with backoff.
    #[error("Transient provider error: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
        /// Provider-suggested delay before retrying, if any.
        retry_after: Option<Duration>,
    },

    /// Fatal failure requiring operator intervention. Aborts the subtree.
    #[error("Fatal provider error: {message}")]
    Fatal {
        /// Description of the failure.
        message: String,
    },

    /// The provider-side object no longer exists.
    #[error("Resource not found by provider: {provider_id}")]
    NotFound {
        /// Provider-assigned identity that was queried.
        provider_id: String,
    },

    /// No provider is registered for a resource type.
    #[error("No provider registered for resource type: {resource_type}")]
    UnknownType {
        /// The unhandled resource type.
        resource_type: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The plan references a resource missing from the declaration set.
    #[error("Plan references unknown resource: {name}")]
    UnknownResource {
        /// The unknown logical name.
        name: String,
    },

    /// A snapshot entry is missing data the planner needs.
    #[error("Snapshot entry for '{name}' is incomplete: {message}")]
    IncompleteRecord {
        /// The affected resource name.
        name: String,
        /// Description of what is missing.
        message: String,
    },
}

/// Apply execution errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The run was cancelled.
    #[error("Apply cancelled")]
    Cancelled,

    /// Retries were exhausted for a resource.
    #[error("Maximum retry attempts ({attempts}) exceeded for {resource}: {last_error}")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Resource that failed.
        resource: String,
        /// The final error message.
        last_error: String,
    },

    /// A resource was skipped because an upstream dependency failed.
    #[error("Resource '{resource}' skipped: dependency '{failed_dependency}' failed")]
    DependencyFailed {
        /// The skipped resource.
        resource: String,
        /// The upstream resource that failed.
        failed_dependency: String,
    },

    /// One or more subtrees failed; see the apply report for details.
    #[error("Apply completed with failures: {failed} failed, {skipped} skipped")]
    PartialFailure {
        /// Number of failed resources.
        failed: usize,
        /// Number of skipped resources.
        skipped: usize,
    },
}

/// Result type alias for Stratus operations.
pub type Result<T> = std::result::Result<T, StratusError>;

impl StratusError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::Transient { .. }))
    }

    /// Returns the provider-suggested retry delay, if applicable.
    #[must_use]
    pub const fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Provider(ProviderError::Transient { retry_after, .. }) => *retry_after,
            _ => None,
        }
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

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a transient error without a suggested delay.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Returns true if retrying this error may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_provider_errors_are_retryable() {
        let err = StratusError::Provider(ProviderError::transient("rate limited"));
        assert!(err.is_retryable());

        let err = StratusError::Provider(ProviderError::fatal("quota exhausted"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn retry_delay_comes_from_provider_hint() {
        let err = StratusError::Provider(ProviderError::Transient {
            message: String::from("throttled"),
            retry_after: Some(Duration::from_secs(7)),
        });
        assert_eq!(err.retry_delay(), Some(Duration::from_secs(7)));

        let err = StratusError::Graph(GraphError::DuplicateResource {
            name: String::from("rg"),
        });
        assert_eq!(err.retry_delay(), None);
    }
}
