//! Error types for the exchange kernel.

use skiff_transport::TransportError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for exchange operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for exchange operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-contract bytes on the wire.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A parameter was rejected at construction time.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A bounded wait elapsed; which wait is determined by where the error
    /// surfaced (a local-write wait returns it directly, a remote-response
    /// wait delivers it through the future).
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// A bounded wait was severed before it could resolve.
    #[error("wait interrupted")]
    Interrupted,

    /// The transport reported a send failure; delivered through the same
    /// response path as remote completions.
    #[error("write failed: {0}")]
    WriteFailure(String),

    /// Error reported by the transport collaborator.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The exchange channel is closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame did not start with the protocol magic.
    #[error("bad magic: {found:#06x}")]
    BadMagic {
        /// The two bytes found where the magic was expected.
        found: u16,
    },

    /// The declared total length cannot describe a valid frame.
    #[error("declared length {declared} out of range (max body {max} bytes)")]
    BadLength {
        /// Total length declared on the wire.
        declared: u64,
        /// Maximum accepted body length.
        max: usize,
    },

    /// A negotiate-heartbeat body did not match the fixed layout.
    #[error("malformed negotiate payload: {0}")]
    BadNegotiatePayload(String),
}

/// Parameter-validation errors, raised at construction and never deferred
/// to transmission time.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Serialize-type tag outside its 5-bit range.
    #[error("serialize type {0} outside 0..=31")]
    SerializeTypeRange(u8),

    /// Compress-type tag outside its 4-bit range.
    #[error("compress type {0} outside 0..=15")]
    CompressTypeRange(u8),

    /// Language tag outside its 4-bit range.
    #[error("language tag {0} outside 0..=15")]
    LangTypeRange(u8),

    /// Timeouts must be strictly positive.
    #[error("timeout must be positive")]
    NonPositiveTimeout,

    /// Negotiated idle timeouts are carried in one byte.
    #[error("idle timeout {0}s outside 1..=127")]
    IdleTimeoutRange(u8),

    /// A pending call already exists for this packet identifier.
    #[error("packet id {0} already has a pending call")]
    DuplicatePacketId(i32),
}
