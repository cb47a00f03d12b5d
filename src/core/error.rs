//! Typed error handling for the repository layer
//!
//! Every fallible operation in the crate returns [`RepositoryError`]. The
//! pipeline is fail-fast: a condition-compilation or criterion error aborts
//! the operation before the data source is touched.
//!
//! # Example
//!
//! ```rust,ignore
//! use cached_repo::prelude::*;
//!
//! match repository.find(id).await {
//!     Ok(record) => println!("Found: {:?}", record),
//!     Err(RepositoryError::NotFound { id, .. }) => println!("{} not found", id),
//!     Err(e) => eprintln!("[{}] {}", e.error_code(), e),
//! }
//! ```

use serde::Serialize;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// The error type for every repository, cache and registry operation
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Invalid setup: unknown criterion alias, unreadable config file...
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A condition value has the wrong shape for its kind
    #[error("Type mismatch for field '{field}': {kind} expects {expected}")]
    TypeMismatch {
        field: String,
        kind: String,
        expected: &'static str,
    },

    /// Unknown comparison operator or malformed condition input
    #[error("Invalid condition for field '{field}': {message}")]
    InvalidCondition { field: String, message: String },

    /// A soft-delete operation was requested on a record type without that capability
    #[error("{resource} does not support soft deletes (required by {operation})")]
    CapabilityMissing { resource: String, operation: String },

    /// A find-style lookup matched nothing
    #[error("{resource} with id '{id}' not found")]
    NotFound { resource: String, id: String },

    /// The data source failed to apply a mutation
    #[error("Failed to {operation} {resource}: {message}")]
    PersistenceFailure {
        resource: String,
        operation: String,
        message: String,
    },

    /// Record or attribute (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The cache store could not be reached or rejected an operation
    #[error("Cache store error: {0}")]
    Cache(String),

    /// The cache key registry backend failed to load or persist
    #[error("Cache key registry error: {0}")]
    Registry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error payload suitable for logging or returning over an API boundary
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl RepositoryError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            RepositoryError::Configuration { .. } => "CONFIGURATION_ERROR",
            RepositoryError::TypeMismatch { .. } => "TYPE_MISMATCH",
            RepositoryError::InvalidCondition { .. } => "INVALID_CONDITION",
            RepositoryError::CapabilityMissing { .. } => "CAPABILITY_MISSING",
            RepositoryError::NotFound { .. } => "NOT_FOUND",
            RepositoryError::PersistenceFailure { .. } => "PERSISTENCE_FAILURE",
            RepositoryError::Serialization(_) => "SERIALIZATION_ERROR",
            RepositoryError::Cache(_) => "CACHE_ERROR",
            RepositoryError::Registry(_) => "REGISTRY_ERROR",
            RepositoryError::Io(_) => "IO_ERROR",
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        RepositoryError::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_condition(field: impl Into<String>, message: impl Into<String>) -> Self {
        RepositoryError::InvalidCondition {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn capability_missing(resource: &str, operation: &str) -> Self {
        RepositoryError::CapabilityMissing {
            resource: resource.to_string(),
            operation: operation.to_string(),
        }
    }

    pub(crate) fn persistence(resource: &str, operation: &str, message: impl Into<String>) -> Self {
        RepositoryError::PersistenceFailure {
            resource: resource.to_string(),
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for RepositoryError {
    fn from(err: serde_yaml::Error) -> Self {
        RepositoryError::Configuration {
            message: format!("Invalid YAML: {}", err),
        }
    }
}
