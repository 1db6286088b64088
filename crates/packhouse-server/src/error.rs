//! Server error handling
//!
//! Two layers: `ServerError` for failures that stop the server itself
//! (bad config, bind failure, store init), and `SessionError` for
//! failures inside one session, which map onto wire error codes and
//! never outlive the request or channel that caused them.

use thiserror::Error;

use packhouse_metadata::MetadataError;
use packhouse_wire::ErrorCode;

/// Result type for server setup and the accept loop.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that prevent the server from starting or accepting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("metadata store error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// A failure inside one upload, download, or activation request.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not authorized")]
    NotAuthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("stream is locked by another writer")]
    StreamLocked,

    #[error("{0}")]
    Internal(String),
}

impl SessionError {
    /// The wire error code this failure is reported as.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::NotAuthorized => ErrorCode::NotAuthorized,
            SessionError::NotFound(_) => ErrorCode::NotFound,
            SessionError::StreamLocked => ErrorCode::StreamLocked,
            SessionError::Internal(_) => ErrorCode::ServerError,
        }
    }
}

impl From<MetadataError> for SessionError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::PackageNotFound(what) | MetadataError::BatchNotFound(what) => {
                SessionError::NotFound(what)
            }
            other => SessionError::Internal(other.to_string()),
        }
    }
}

impl From<packhouse_storage::Error> for SessionError {
    fn from(err: packhouse_storage::Error) -> Self {
        SessionError::Internal(err.to_string())
    }
}
