//! Error types for the object store.

use std::sync::Arc;

use common::crypto::SignError;

use crate::classify::ErrorDescriptor;
use crate::naming::NameError;

/// Coarse category of a failure, independent of where it was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or expired signature, unknown key, or missing permissions. Not retried.
    Authentication,
    /// The service is throttling requests. Safe to retry with backoff.
    Capacity,
    /// Network failure, malformed request or unreadable response.
    Communication,
    /// Signing material is missing or incomplete.
    Configuration,
    /// Key decoding or the signature operation failed.
    InternalSigning,
    /// Checksum or length mismatch on a transferred object.
    DataIntegrity,
    /// The caller passed a name that violates the naming constraints.
    InvalidInput,
    /// An entity that had to exist was not there.
    NotFound,
    /// Anything the service reported that has no better category.
    General,
}

/// Errors that can occur when working with the object store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Classified failure response from the service
    #[error("service error: {0}")]
    Service(ErrorDescriptor),

    /// Connection or IO failure while talking to the service
    #[error("communication error: {0}")]
    Communication(#[from] reqwest::Error),

    /// Response arrived but could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request signing failed
    #[error(transparent)]
    Signing(#[from] SignError),

    /// Checksum or length mismatch
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// Bucket or object name rejected before any request was made
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        name: String,
        #[source]
        reason: NameError,
    },

    /// A value could not be carried in an HTTP header
    #[error("invalid header value {0}")]
    InvalidHeader(String),

    /// Local IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity required by the operation does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The link to the new name exists but the old name could not be removed
    #[error("rename of '{from}' to '{to}' is incomplete, object exists under both names: {source}")]
    PartialRename {
        from: String,
        to: String,
        #[source]
        source: Box<StoreError>,
    },

    /// Failure observed through a transfer handle
    #[error("transfer failed: {0}")]
    Transfer(Arc<StoreError>),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Background work was requested outside a Tokio runtime
    #[error("no tokio runtime to run the transfer on: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

impl StoreError {
    /// Map this error onto the store's error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Service(descriptor) => descriptor.kind(),
            StoreError::Communication(_) | StoreError::InvalidResponse(_) => {
                ErrorKind::Communication
            }
            StoreError::Signing(SignError::Configuration(_)) => ErrorKind::Configuration,
            StoreError::Signing(SignError::Signing(_)) => ErrorKind::InternalSigning,
            StoreError::DataIntegrity(_) => ErrorKind::DataIntegrity,
            StoreError::InvalidName { .. } | StoreError::InvalidHeader(_) => {
                ErrorKind::InvalidInput
            }
            StoreError::Io(_) => ErrorKind::General,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::PartialRename { source, .. } => source.kind(),
            StoreError::Transfer(inner) => inner.kind(),
            StoreError::InvalidConfig(_) | StoreError::NoRuntime(_) => ErrorKind::Configuration,
        }
    }
}

/// Result type alias for object store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
