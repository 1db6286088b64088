//! Client error types.

use packhouse_wire::{ErrorCode, WireError};
use thiserror::Error;

/// Convenience alias used throughout the client.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Everything that can go wrong while driving the protocol.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not reach the server.
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be read or written.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The server answered with something the protocol does not allow
    /// at this point.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The server rejected the request.
    ///
    /// `code` is the closed wire-level error set, so callers can match
    /// on it (`StreamLocked` means retry later, `NotAuthorized` means
    /// do not bother).
    #[error("server rejected the request ({code}): {message}")]
    Server { code: ErrorCode, message: String },

    /// The connection ended mid-conversation.
    #[error("server closed the connection")]
    ConnectionClosed,
}
