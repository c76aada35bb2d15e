//! Per-call configuration.

use crate::error::ValidationError;
use crate::protocol::{check_compress_type, check_serialize_type};
use std::time::Duration;

/// Default bound for request timeouts.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-call parameters supplied by the caller.
///
/// A plain configuration value, not shared state. `sent` controls whether
/// the call blocks until the local write is acknowledged by the transport
/// before returning.
#[derive(Debug, Clone)]
pub struct RequestControl {
    timeout: Duration,
    opcode: i16,
    serialize_type: u8,
    compress_type: u8,
    sent: bool,
}

impl RequestControl {
    /// Create a control for the given opcode with default settings.
    #[must_use]
    pub const fn new(opcode: i16) -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            opcode,
            serialize_type: 0,
            compress_type: 0,
            sent: false,
        }
    }

    /// Set the call timeout.
    ///
    /// # Errors
    ///
    /// Rejects a zero timeout at construction time.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ValidationError> {
        if timeout.is_zero() {
            return Err(ValidationError::NonPositiveTimeout);
        }
        self.timeout = timeout;
        Ok(self)
    }

    /// Set the serialize-type tag.
    ///
    /// # Errors
    ///
    /// Rejects a tag outside its five-bit range.
    pub fn with_serialize_type(mut self, serialize_type: u8) -> Result<Self, ValidationError> {
        self.serialize_type = check_serialize_type(serialize_type)?;
        Ok(self)
    }

    /// Set the compress-type tag.
    ///
    /// # Errors
    ///
    /// Rejects a tag outside its four-bit range.
    pub fn with_compress_type(mut self, compress_type: u8) -> Result<Self, ValidationError> {
        self.compress_type = check_compress_type(compress_type)?;
        Ok(self)
    }

    /// Block until the local write is acknowledged before returning.
    #[must_use]
    pub const fn with_sent(mut self, sent: bool) -> Self {
        self.sent = sent;
        self
    }

    /// The call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The operation selector.
    #[must_use]
    pub const fn opcode(&self) -> i16 {
        self.opcode
    }

    /// The serialize-type tag.
    #[must_use]
    pub const fn serialize_type(&self) -> u8 {
        self.serialize_type
    }

    /// The compress-type tag.
    #[must_use]
    pub const fn compress_type(&self) -> u8 {
        self.compress_type
    }

    /// Whether the call waits for local-write acknowledgment.
    #[must_use]
    pub const fn sent(&self) -> bool {
        self.sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let control = RequestControl::new(7);
        assert_eq!(control.opcode(), 7);
        assert_eq!(control.timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert!(!control.sent());
    }

    #[test]
    fn test_validation_fails_fast() {
        assert!(RequestControl::new(1).with_timeout(Duration::ZERO).is_err());
        assert!(RequestControl::new(1).with_serialize_type(32).is_err());
        assert!(RequestControl::new(1).with_compress_type(16).is_err());
    }

    #[test]
    fn test_builder_chain() {
        let control = RequestControl::new(9)
            .with_timeout(Duration::from_millis(50))
            .unwrap()
            .with_serialize_type(1)
            .unwrap()
            .with_sent(true);
        assert_eq!(control.timeout(), Duration::from_millis(50));
        assert_eq!(control.serialize_type(), 1);
        assert!(control.sent());
    }
}
