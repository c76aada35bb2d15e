//! Error types for transport implementations.

use thiserror::Error;

/// Errors reported by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection was closed by either side.
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed to establish a connection.
    #[error("failed to connect to {addr}: {reason}")]
    ConnectFailed {
        /// The address we tried to connect to.
        addr: String,
        /// Why the attempt failed.
        reason: String,
    },

    /// The transport could not deliver a frame.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The write was cancelled before the transport acknowledged it.
    #[error("send cancelled")]
    SendCancelled,

    /// The transport dropped the send acknowledgment without resolving it.
    #[error("send acknowledgment severed")]
    AckSevered,

    /// The listener is closed.
    #[error("listener closed")]
    ListenerClosed,

    /// The address is not valid for this transport.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
