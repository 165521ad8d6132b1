//! Error types for rightgate

use thiserror::Error;

/// The main error type for rightgate operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclError {
    #[error("no such right: {0}")]
    UnknownRight(String),

    #[error("invalid grantee: {0}")]
    InvalidGrantee(String),

    #[error("malformed ACE: {0}")]
    MalformedAce(String),

    #[error("constraint violated: {0}")]
    ConstraintViolated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("right catalog: {0}")]
    Catalog(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no such grant: {0}")]
    NoSuchGrant(String),

    #[error("directory: {0}")]
    Directory(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("config: {0}")]
    Config(String),
}

impl AclError {
    /// Errors that mean the security configuration itself cannot be trusted.
    /// These escape the fail-closed conversion at the top-level checks.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AclError::MalformedAce(_) | AclError::Catalog(_) | AclError::InternalInconsistency(_))
    }
}

/// Result type alias for rightgate operations
pub type Result<T> = std::result::Result<T, AclError>;

/// Convert a storage-layer error (heed, io) to AclError
pub fn err<E: std::error::Error>(e: E) -> AclError {
    AclError::Storage(e.to_string())
}

/// Convert a configuration parse error (serde_json, io) to AclError
pub fn config_err<E: std::error::Error>(e: E) -> AclError {
    AclError::Config(e.to_string())
}
