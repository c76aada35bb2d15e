//! Protocol layer for the exchange kernel.
//!
//! This module contains the core protocol definitions including:
//! - The wire envelope and its bit-packed header
//! - Framing codec implementation
//! - Negotiate-heartbeat body layout

pub mod framing;
pub mod negotiate;

use crate::error::ValidationError;
use bytes::{BufMut, Bytes, BytesMut};
use negotiate::NegotiateOffer;

pub use framing::{HEADER_LENGTH, MAGIC, MAX_BODY_LENGTH, RemotingCodec};

/// Reserved opcodes, kept out of the application's non-negative range.
pub mod opcode {
    /// Ordinary heartbeat.
    pub const HEARTBEAT: i16 = -1;
    /// Heartbeat carrying a negotiation payload.
    pub const HEARTBEAT_WITH_NEGOTIATE: i16 = -2;
}

/// Result code carried in a response body built by the kernel: success.
pub const RESULT_SUCCESS: u8 = 0;
/// Reserved result code marking a synthesized failure response.
pub const RESULT_FAIL: u8 = 1;

/// Highest serialize-type tag (five bits on the wire).
pub const MAX_SERIALIZE_TYPE: u8 = 0x1F;
/// Highest compress-type tag (four bits on the wire).
pub const MAX_COMPRESS_TYPE: u8 = 0x0F;
/// Highest language tag (four bits on the wire).
pub const MAX_LANG_TYPE: u8 = 0x0F;
/// Language tag identifying this implementation to foreign stacks.
pub const LANG_RUST: u8 = 2;

const REQUEST_FLAG: u8 = 0x80;
const ONEWAY_FLAG: u8 = 0x40;
const HEARTBEAT_FLAG: u8 = 0x20;

pub(crate) fn check_serialize_type(value: u8) -> Result<u8, ValidationError> {
    if value > MAX_SERIALIZE_TYPE {
        return Err(ValidationError::SerializeTypeRange(value));
    }
    Ok(value)
}

pub(crate) fn check_compress_type(value: u8) -> Result<u8, ValidationError> {
    if value > MAX_COMPRESS_TYPE {
        return Err(ValidationError::CompressTypeRange(value));
    }
    Ok(value)
}

pub(crate) fn check_lang_type(value: u8) -> Result<u8, ValidationError> {
    if value > MAX_LANG_TYPE {
        return Err(ValidationError::LangTypeRange(value));
    }
    Ok(value)
}

/// The unit exchanged on the wire.
///
/// One frame is one request or response envelope; the body is an opaque
/// byte sequence the kernel never interprets. Tags are validated against
/// their bit-width range at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    request: bool,
    oneway: bool,
    heartbeat: bool,
    serialize_type: u8,
    packet_id: i32,
    opcode: i16,
    compress_type: u8,
    lang_type: u8,
    body: Bytes,
}

impl Frame {
    /// Build a request envelope.
    ///
    /// # Errors
    ///
    /// Fails fast if a tag is outside its bit-width range.
    pub fn request(
        packet_id: i32,
        opcode: i16,
        serialize_type: u8,
        compress_type: u8,
        oneway: bool,
        body: Bytes,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            request: true,
            oneway,
            heartbeat: false,
            serialize_type: check_serialize_type(serialize_type)?,
            packet_id,
            opcode,
            compress_type: check_compress_type(compress_type)?,
            lang_type: LANG_RUST,
            body,
        })
    }

    /// Build a response envelope.
    ///
    /// # Errors
    ///
    /// Fails fast if a tag is outside its bit-width range.
    pub fn response(
        packet_id: i32,
        opcode: i16,
        serialize_type: u8,
        compress_type: u8,
        body: Bytes,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            request: false,
            oneway: false,
            heartbeat: false,
            serialize_type: check_serialize_type(serialize_type)?,
            packet_id,
            opcode,
            compress_type: check_compress_type(compress_type)?,
            lang_type: LANG_RUST,
            body,
        })
    }

    /// An ordinary heartbeat request.
    #[must_use]
    pub fn heartbeat_request(packet_id: i32) -> Self {
        Self {
            request: true,
            oneway: false,
            heartbeat: true,
            serialize_type: 0,
            packet_id,
            opcode: opcode::HEARTBEAT,
            compress_type: 0,
            lang_type: LANG_RUST,
            body: Bytes::new(),
        }
    }

    /// An ordinary heartbeat response.
    #[must_use]
    pub fn heartbeat_response(packet_id: i32) -> Self {
        Self {
            request: false,
            ..Self::heartbeat_request(packet_id)
        }
    }

    /// A heartbeat request carrying a negotiation offer.
    #[must_use]
    pub fn negotiate_request(packet_id: i32, offer: &NegotiateOffer) -> Self {
        Self {
            opcode: opcode::HEARTBEAT_WITH_NEGOTIATE,
            body: offer.encode(),
            ..Self::heartbeat_request(packet_id)
        }
    }

    /// A synthesized failure response: the reserved result code followed by
    /// a human-readable message.
    #[must_use]
    pub fn failure_response(packet_id: i32, message: &str) -> Self {
        let mut body = BytesMut::with_capacity(1 + message.len());
        body.put_u8(RESULT_FAIL);
        body.put_slice(message.as_bytes());
        Self {
            request: false,
            oneway: false,
            heartbeat: false,
            serialize_type: 0,
            packet_id,
            opcode: 0,
            compress_type: 0,
            lang_type: LANG_RUST,
            body: body.freeze(),
        }
    }

    /// Override the language tag.
    ///
    /// # Errors
    ///
    /// Fails if the tag does not fit in four bits.
    pub fn with_lang_type(mut self, lang_type: u8) -> Result<Self, ValidationError> {
        self.lang_type = check_lang_type(lang_type)?;
        Ok(self)
    }

    /// Parse a kernel-built result body: `(result_code, message)`.
    ///
    /// Returns `None` for an empty body.
    #[must_use]
    pub fn failure_message(&self) -> Option<(u8, String)> {
        let code = *self.body.first()?;
        Some((code, String::from_utf8_lossy(&self.body[1..]).into_owned()))
    }

    pub(crate) fn from_wire(flags: u8, packet_id: i32, opcode: i16, tag: u8, body: Bytes) -> Self {
        Self {
            request: flags & REQUEST_FLAG != 0,
            oneway: flags & ONEWAY_FLAG != 0,
            heartbeat: flags & HEARTBEAT_FLAG != 0,
            serialize_type: flags & MAX_SERIALIZE_TYPE,
            packet_id,
            opcode,
            compress_type: (tag >> 4) & MAX_COMPRESS_TYPE,
            lang_type: tag & MAX_LANG_TYPE,
            body,
        }
    }

    pub(crate) fn flags_byte(&self) -> u8 {
        let mut flags = self.serialize_type;
        if self.request {
            flags |= REQUEST_FLAG;
        }
        if self.oneway {
            flags |= ONEWAY_FLAG;
        }
        if self.heartbeat {
            flags |= HEARTBEAT_FLAG;
        }
        flags
    }

    pub(crate) fn tag_byte(&self) -> u8 {
        self.compress_type << 4 | self.lang_type
    }

    /// Direction bit: request or response.
    #[must_use]
    pub const fn is_request(&self) -> bool {
        self.request
    }

    /// Whether no response envelope will ever be sent for this request.
    #[must_use]
    pub const fn is_oneway(&self) -> bool {
        self.oneway
    }

    /// Heartbeat flag.
    #[must_use]
    pub const fn is_heartbeat(&self) -> bool {
        self.heartbeat
    }

    /// Serialize-type tag.
    #[must_use]
    pub const fn serialize_type(&self) -> u8 {
        self.serialize_type
    }

    /// Caller-assigned correlation key.
    #[must_use]
    pub const fn packet_id(&self) -> i32 {
        self.packet_id
    }

    /// Application-defined operation selector.
    #[must_use]
    pub const fn opcode(&self) -> i16 {
        self.opcode
    }

    /// Compress-type tag.
    #[must_use]
    pub const fn compress_type(&self) -> u8 {
        self.compress_type
    }

    /// Language tag of the sending implementation.
    #[must_use]
    pub const fn lang_type(&self) -> u8 {
        self.lang_type
    }

    /// The opaque body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the frame, keeping only the body.
    #[must_use]
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Declared total length: header plus body.
    #[must_use]
    pub const fn total_length(&self) -> usize {
        HEADER_LENGTH + self.body.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_validated_at_construction() {
        assert!(Frame::request(1, 7, 32, 0, false, Bytes::new()).is_err());
        assert!(Frame::request(1, 7, 0, 16, false, Bytes::new()).is_err());
        assert!(Frame::request(1, 7, 31, 15, false, Bytes::new()).is_ok());
        assert!(
            Frame::request(1, 7, 0, 0, false, Bytes::new())
                .unwrap()
                .with_lang_type(16)
                .is_err()
        );
    }

    #[test]
    fn heartbeat_frames_use_reserved_opcodes() {
        let hb = Frame::heartbeat_request(3);
        assert!(hb.is_request() && hb.is_heartbeat() && !hb.is_oneway());
        assert_eq!(hb.opcode(), opcode::HEARTBEAT);
        assert!(hb.body().is_empty());

        let reply = Frame::heartbeat_response(3);
        assert!(!reply.is_request() && reply.is_heartbeat());
        assert_eq!(reply.packet_id(), 3);
    }

    #[test]
    fn failure_response_carries_reserved_code() {
        let frame = Frame::failure_response(9, "write fail!");
        let (code, message) = frame.failure_message().unwrap();
        assert_eq!(code, RESULT_FAIL);
        assert_eq!(message, "write fail!");
        assert!(!frame.is_request());
        assert_eq!(frame.packet_id(), 9);
    }
}
