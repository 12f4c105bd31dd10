//! Transport and bridge errors

use thiserror::Error;

/// Errors from the protocol bridge
#[derive(Debug, Error)]
pub enum TransportError {
    /// A bounded channel is full; the request fails, the workload continues
    #[error("message queue is full")]
    Backpressure,

    /// A line from the container could not be parsed as JSON-RPC
    #[error("failed to parse JSON-RPC message: {0}")]
    ParseFailure(String),

    /// A syntactically valid message violated JSON-RPC 2.0
    #[error("invalid JSON-RPC message: {0}")]
    InvalidMessage(String),

    /// POST referenced a session id with no connected client
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// HTTP server failure (bind, serve)
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Container stdio failure
    #[error("stdio error: {0}")]
    Io(#[from] std::io::Error),

    /// The bridge is shutting down
    #[error("bridge is shut down")]
    Shutdown,
}

pub type Result<T, E = TransportError> = std::result::Result<T, E>;
