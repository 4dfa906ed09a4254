//! Error types for the API cache deployment system.
//!
//! This module provides the error hierarchy for every stage of the resource
//! lifecycle: configuration, schema validation, state management, the remote
//! control plane, planning, and reconciliation.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the deployment system.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Attribute values rejected by a resource schema.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Transport errors that are not tied to a specific resource.
    #[error("Remote API error: {0}")]
    Remote(#[from] RemoteError),

    /// Resource adapter errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

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

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Kind of resource.
        resource_type: String,
        /// The duplicated name.
        name: String,
    },

    /// Two configured resources claim the same remote identity.
    #[error("{kind} '{id}' is declared by both {first} and {second}")]
    DuplicateOwner {
        /// Kind of resource.
        kind: String,
        /// The shared identifier.
        id: String,
        /// Address that declared it first.
        first: String,
        /// Address that declared it again.
        second: String,
    },
}

/// A single attribute rejected by a resource schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required attribute was not supplied.
    #[error("{attribute}: required attribute is missing")]
    MissingRequired {
        /// Attribute name.
        attribute: String,
    },

    /// A required attribute was supplied with an empty value.
    #[error("{attribute}: must not be empty")]
    Empty {
        /// Attribute name.
        attribute: String,
    },

    /// The value has the wrong type.
    #[error("{attribute}: expected {expected}, got {found}")]
    TypeMismatch {
        /// Attribute name.
        attribute: String,
        /// Declared type.
        expected: String,
        /// Type of the supplied value.
        found: String,
    },

    /// The value contains characters outside the allowed set.
    #[error("{attribute}: {value:?} may only contain letters, digits, '-' and '_'")]
    InvalidCharacters {
        /// Attribute name.
        attribute: String,
        /// Supplied value.
        value: String,
    },

    /// The value is not one of the allowed tokens.
    #[error("{attribute}: expected one of [{allowed}], got {value:?}")]
    NotInSet {
        /// Attribute name.
        attribute: String,
        /// Supplied value.
        value: String,
        /// Comma separated allowed tokens.
        allowed: String,
    },

    /// The value is outside the declared numeric range.
    #[error("{attribute}: expected to be in the range ({min} - {max}), got {value}")]
    OutOfRange {
        /// Attribute name.
        attribute: String,
        /// Supplied value.
        value: i64,
        /// Inclusive lower bound.
        min: i64,
        /// Inclusive upper bound.
        max: i64,
    },

    /// The attribute is not declared by the schema.
    #[error("{attribute}: not a known attribute of {kind}")]
    UnknownAttribute {
        /// Resource kind.
        kind: String,
        /// Attribute name.
        attribute: String,
    },

    /// The attribute is computed by the remote side and cannot be configured.
    #[error("{attribute}: computed attribute cannot be set")]
    Computed {
        /// Attribute name.
        attribute: String,
    },
}

/// Every violation found while validating one attribute set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    /// Resource kind being validated.
    pub kind: String,
    /// Resource address, when known.
    pub resource: Option<String>,
    /// Individual violations, in schema order.
    pub errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// Attaches the resource address to the errors.
    #[must_use]
    pub fn for_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Returns true if the given attribute has at least one violation.
    #[must_use]
    pub fn mentions(&self, attribute: &str) -> bool {
        self.errors.iter().any(|e| e.attribute() == attribute)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "invalid {resource}: ")?,
            None => write!(f, "invalid {}: ", self.kind)?,
        }
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl ValidationError {
    /// Returns the attribute this violation refers to.
    #[must_use]
    pub fn attribute(&self) -> &str {
        match self {
            Self::MissingRequired { attribute }
            | Self::Empty { attribute }
            | Self::TypeMismatch { attribute, .. }
            | Self::InvalidCharacters { attribute, .. }
            | Self::NotInSet { attribute, .. }
            | Self::OutOfRange { attribute, .. }
            | Self::UnknownAttribute { attribute, .. }
            | Self::Computed { attribute } => attribute,
        }
    }
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Errors returned by the control-plane transport.
///
/// Classification happens once, in the transport, so callers match on the
/// variant instead of inspecting messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote side reports that the resource does not exist.
    #[error("Remote resource not found: {resource}")]
    NotFound {
        /// Identifier or description of the missing resource.
        resource: String,
    },

    /// The request was throttled.
    #[error("Request throttled, retry after {retry_after_secs} seconds")]
    Throttled {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The request never produced a response.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// The service answered with a server-side failure.
    #[error("Service unavailable ({status}): {message}")]
    Unavailable {
        /// HTTP status code.
        status: u16,
        /// Error message from the service.
        message: String,
    },

    /// Another modification is in progress on the same resource.
    #[error("Concurrent modification: {message}")]
    Conflict {
        /// Error message from the service.
        message: String,
    },

    /// Credentials were rejected or lack permission.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Error message from the service.
        message: String,
    },

    /// An account limit was reached.
    #[error("Quota exceeded: {message}")]
    QuotaExceeded {
        /// Error message from the service.
        message: String,
    },

    /// The request was malformed or rejected.
    #[error("Bad request: {message}")]
    BadRequest {
        /// Error message from the service.
        message: String,
    },

    /// The response could not be understood.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

impl RemoteError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Returns true if the remote side reported the resource as absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the failure is transient and the call may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. }
                | Self::Network { .. }
                | Self::Unavailable { .. }
                | Self::Conflict { .. }
        )
    }
}

/// Lifecycle operation an adapter was performing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Create.
    Create,
    /// Read.
    Read,
    /// Update.
    Update,
    /// Delete.
    Delete,
    /// Import.
    Import,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "creating",
            Self::Read => "reading",
            Self::Update => "updating",
            Self::Delete => "deleting",
            Self::Import => "importing",
        };
        write!(f, "{s}")
    }
}

/// Resource adapter errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A remote call failed; carries the resource context.
    #[error("error {operation} {kind} ({id}): {source}")]
    Remote {
        /// Resource kind.
        kind: String,
        /// Resource identifier.
        id: String,
        /// Operation in progress.
        operation: Operation,
        /// Underlying transport error.
        #[source]
        source: RemoteError,
    },

    /// The identifier given to import does not exist remotely.
    #[error("cannot import {kind} ({id}): it does not exist")]
    ImportNotFound {
        /// Resource kind.
        kind: String,
        /// External identifier.
        id: String,
    },

    /// No adapter is registered for the kind.
    #[error("unknown resource kind: {kind}")]
    UnknownKind {
        /// The requested kind.
        kind: String,
    },

    /// A validated attribute set could not be turned into a request.
    #[error("{kind}: attribute {attribute} is unusable: {message}")]
    InvalidAttribute {
        /// Resource kind.
        kind: String,
        /// Attribute name.
        attribute: String,
        /// What went wrong.
        message: String,
    },
}

impl ProviderError {
    /// Returns the transport error, if this wraps one.
    #[must_use]
    pub const fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The plan violates configured guardrails.
    #[error("Plan violates guardrails: {}", .violations.join(", "))]
    GuardrailViolation {
        /// Descriptions of each violation.
        violations: Vec<String>,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reconciliation failed for a specific resource.
    #[error("Failed to reconcile {resource_type} '{name}': {reason}")]
    ResourceReconcileFailed {
        /// Type of resource.
        resource_type: String,
        /// Name of the resource.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Refreshing tracked resources failed.
    #[error("Failed to refresh {} resource(s): {}", .failures.len(), .failures.join("; "))]
    RefreshFailed {
        /// One message per failed resource.
        failures: Vec<String>,
    },

    /// The address is already tracked in state.
    #[error("{addr} is already tracked in state")]
    AlreadyTracked {
        /// The resource address.
        addr: String,
    },

    /// Reconciliation was cancelled before finishing.
    #[error("Reconciliation cancelled: {remaining} resource(s) not processed")]
    Cancelled {
        /// Number of resources left untouched.
        remaining: usize,
    },
}

/// Result type alias for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the transport error behind this error, if any.
    #[must_use]
    pub const fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(e) => Some(e),
            Self::Provider(e) => e.remote(),
            _ => None,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.remote().is_some_and(RemoteError::is_transient)
            || matches!(self, Self::State(StateError::LockFailed { .. }))
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
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Throttled { retry_after_secs: 1 }.is_transient());
        assert!(RemoteError::network("reset").is_transient());
        assert!(!RemoteError::not_found("api-1").is_transient());
        assert!(!RemoteError::AccessDenied { message: String::new() }.is_transient());
        assert!(!RemoteError::bad_request("nope").is_transient());
    }

    #[test]
    fn test_provider_error_carries_context() {
        let err = DeployError::from(ProviderError::Remote {
            kind: String::from("api_cache"),
            id: String::from("api-1"),
            operation: Operation::Create,
            source: RemoteError::bad_request("ttl too large"),
        });

        let message = err.to_string();
        assert!(message.contains("error creating api_cache (api-1)"));
        assert!(message.contains("ttl too large"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_throttle_is_retryable() {
        let err = DeployError::from(RemoteError::Throttled { retry_after_secs: 7 });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validation_errors_display_lists_all() {
        let errors = ValidationErrors {
            kind: String::from("api_cache"),
            resource: None,
            errors: vec![
                ValidationError::MissingRequired {
                    attribute: String::from("api_id"),
                },
                ValidationError::OutOfRange {
                    attribute: String::from("ttl"),
                    value: 0,
                    min: 1,
                    max: 3600,
                },
            ],
        }
        .for_resource("api_cache.primary");

        let message = errors.to_string();
        assert!(message.starts_with("invalid api_cache.primary: "));
        assert!(message.contains("api_id: required attribute is missing"));
        assert!(message.contains("ttl: expected to be in the range (1 - 3600), got 0"));
        assert!(errors.mentions("ttl"));
        assert!(!errors.mentions("type"));
    }
}
