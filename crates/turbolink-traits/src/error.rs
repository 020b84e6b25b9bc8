//! Transport error types.

use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors raised by a channel adapter while connecting, sending or probing.
///
/// Causes are carried as strings so the error stays `Clone`; the engine fans a
/// single failure out to events and to several waiting callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The transport is not connected (never opened, closed, or torn down).
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Failed to deliver a payload.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The remote answered with a non-success HTTP status.
    #[error("Unexpected HTTP status {status}")]
    HttpStatus {
        /// The status code returned by the remote
        status: u16,
    },

    /// The operation did not complete within the configured timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// The timeout duration that was exceeded
        timeout: Duration,
    },

    /// Failed to serialize or deserialize a payload.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The transport was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    /// Build a [`TransportError::Timeout`] for the named operation.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Returns `true` for errors that describe a broken or missing connection
    /// rather than a rejected payload.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::ConnectionLost(_)
                | Self::NotConnected(_)
                | Self::Timeout { .. }
                | Self::Io(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
