//! Error taxonomy for the failover engine.
//!
//! Every public operation fails with exactly one [`ConnectionError`] variant.
//! Adapter failures arrive wrapped as [`ConnectionError::Transport`]; the rest
//! describe engine-level conditions.

use thiserror::Error;
use turbolink_traits::TransportError;

/// A specialized `Result` type for engine operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Errors surfaced by the channel manager, request buffer, health monitor and
/// connection service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionError {
    /// A channel adapter failed to connect, send, or probe.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No channel is registered under the given id.
    #[error("Channel {0} not found")]
    NotFound(String),

    /// The channel exists but cannot be used right now.
    #[error("Channel {0} is not available")]
    Unavailable(String),

    /// Failover found no usable candidate.
    #[error("No available channels")]
    NoAvailableChannels,

    /// The service (or manager) has no current channel yet.
    #[error("Connection service not initialized")]
    NotInitialized,

    /// `initialize` was called on an already initialized service.
    #[error("Connection service already initialized")]
    AlreadyInitialized,

    /// A buffered request aged out before it could be replayed.
    #[error("Buffered request {id} timed out")]
    BufferTimeout {
        /// Id of the expired buffered request
        id: String,
    },

    /// A buffered request was evicted to make room for a newer one.
    #[error("Buffered request {id} evicted: buffer full")]
    BufferFull {
        /// Id of the evicted buffered request
        id: String,
    },

    /// The buffer was wiped (shutdown) before the request could be replayed.
    #[error("Request buffer cleared")]
    BufferCleared,

    /// A channel with this id is already registered.
    #[error("Channel {0} is already registered")]
    DuplicateChannel(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConnectionError {
    /// Returns `true` if this wraps an adapter-level failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` if the request never reached a channel because the buffer
    /// dropped it (expiry, eviction or shutdown).
    pub fn is_buffer_rejection(&self) -> bool {
        matches!(
            self,
            Self::BufferTimeout { .. } | Self::BufferFull { .. } | Self::BufferCleared
        )
    }
}

impl From<config::ConfigError> for ConnectionError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
