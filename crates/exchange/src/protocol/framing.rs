//! Message framing for the wire protocol.
//!
//! Wire layout, big-endian, fixed across implementations:
//!
//! ```text
//! 1-- magic (2 bytes)
//! 2-- total length (header length + body length, 4 bytes)
//! 3-- header (8 bytes)
//!    3.1-- direction + oneway + heartbeat + serializeType (1 byte)
//!          request(1)/response(0)      (bit 7)
//!          oneway(1)/twoway(0)         (bit 6)
//!          heartbeat(1)/normal(0)      (bit 5)
//!          serializeType(0..=31)       (bits 4-0)
//!    3.2-- packetId (4 bytes, signed)
//!    3.3-- opcode   (2 bytes, signed)
//!    3.4-- compressType(high nibble) | langType(low nibble) (1 byte)
//! 4-- body ((total length - header length) bytes)
//! ```

use crate::error::{Error, ProtocolError};
use crate::protocol::Frame;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The two bytes every frame starts with.
pub const MAGIC: u16 = 0x736B;

/// Fixed header size counted by the total-length field.
pub const HEADER_LENGTH: usize = 8;

/// Magic and total-length preceding the header on the wire.
const PREAMBLE_LENGTH: usize = 6;

/// Maximum accepted body size (8MB by default).
pub const MAX_BODY_LENGTH: usize = 8 * 1024 * 1024;

/// Codec for encoding/decoding frames.
pub struct RemotingCodec {
    max_body_length: usize,
}

impl RemotingCodec {
    /// Create a new codec with the default body limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_body_length: MAX_BODY_LENGTH,
        }
    }

    /// Create a codec with a custom body limit.
    #[must_use]
    pub const fn with_max_body_length(mut self, max: usize) -> Self {
        self.max_body_length = max;
        self
    }
}

impl Default for RemotingCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RemotingCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, Error> {
        if buf.len() < PREAMBLE_LENGTH {
            return Ok(None);
        }

        // Parse the preamble without consuming
        let mut preamble = &buf[..PREAMBLE_LENGTH];
        let magic = preamble.get_u16();
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic { found: magic }.into());
        }
        let declared = preamble.get_u32();
        let total_length = declared as usize;

        if total_length < HEADER_LENGTH || total_length - HEADER_LENGTH > self.max_body_length {
            return Err(ProtocolError::BadLength {
                declared: u64::from(declared),
                max: self.max_body_length,
            }
            .into());
        }

        let frame_length = PREAMBLE_LENGTH + total_length;
        if buf.len() < frame_length {
            buf.reserve(frame_length - buf.len());
            return Ok(None);
        }

        buf.advance(PREAMBLE_LENGTH);
        let flags = buf.get_u8();
        let packet_id = buf.get_i32();
        let opcode = buf.get_i16();
        let tag = buf.get_u8();
        // Exactly the declared body, never past the boundary
        let body = buf.split_to(total_length - HEADER_LENGTH).freeze();

        Ok(Some(Frame::from_wire(flags, packet_id, opcode, tag, body)))
    }
}

impl Encoder<Frame> for RemotingCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> Result<(), Error> {
        if frame.body().len() > self.max_body_length {
            return Err(ProtocolError::BadLength {
                declared: frame.total_length() as u64,
                max: self.max_body_length,
            }
            .into());
        }
        write_frame(&frame, buf);
        Ok(())
    }
}

/// Encode a frame into a standalone buffer.
#[must_use]
pub fn encode(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(PREAMBLE_LENGTH + frame.total_length());
    write_frame(frame, &mut buf);
    buf.freeze()
}

#[allow(clippy::cast_possible_truncation)]
fn write_frame(frame: &Frame, buf: &mut BytesMut) {
    buf.reserve(PREAMBLE_LENGTH + frame.total_length());
    buf.put_u16(MAGIC);
    buf.put_u32(frame.total_length() as u32);
    buf.put_u8(frame.flags_byte());
    buf.put_i32(frame.packet_id());
    buf.put_i16(frame.opcode());
    buf.put_u8(frame.tag_byte());
    if !frame.body().is_empty() {
        buf.put_slice(frame.body());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_one(data: &[u8]) -> Frame {
        let mut codec = RemotingCodec::new();
        let mut buf = BytesMut::from(data);
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::request(42, 7, 1, 0, false, Bytes::from_static(b"hi")).unwrap();
        let decoded = decode_one(&encode(&frame));
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_wire_layout_bit_for_bit() {
        // Two-way request, serialize-type 1, packet id 42, opcode 7,
        // compress 0, lang 0, body "hi"
        let frame = Frame::request(42, 7, 1, 0, false, Bytes::from_static(b"hi"))
            .unwrap()
            .with_lang_type(0)
            .unwrap();
        let encoded = encode(&frame);
        assert_eq!(
            &encoded[..],
            &[
                0x73, 0x6B, // magic
                0x00, 0x00, 0x00, 0x0A, // total length = 8 + 2
                0x81, // request | serialize-type 1
                0x00, 0x00, 0x00, 0x2A, // packet id 42
                0x00, 0x07, // opcode 7
                0x00, // compress 0 | lang 0
                0x68, 0x69, // "hi"
            ]
        );
    }

    #[test]
    fn test_partial_frame_returns_none() {
        let frame = Frame::request(1, 1, 0, 0, false, Bytes::from_static(b"body")).unwrap();
        let encoded = encode(&frame);

        let mut codec = RemotingCodec::new();
        for cut in 0..encoded.len() {
            let mut buf = BytesMut::from(&encoded[..cut]);
            assert!(codec.decode(&mut buf).unwrap().is_none(), "cut at {cut}");
        }
    }

    #[test]
    fn test_bad_magic_is_a_protocol_error() {
        let frame = Frame::heartbeat_request(1);
        let mut encoded = BytesMut::from(&encode(&frame)[..]);
        encoded[0] = 0xFF;

        let mut codec = RemotingCodec::new();
        assert!(matches!(
            codec.decode(&mut encoded),
            Err(Error::Protocol(ProtocolError::BadMagic { found: 0xFF6B }))
        ));
    }

    #[test]
    fn test_undersized_declared_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16(MAGIC);
        buf.put_u32(3); // smaller than the header itself
        buf.put_slice(&[0u8; 8]);

        let mut codec = RemotingCodec::new();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::Protocol(ProtocolError::BadLength { .. }))
        ));
    }

    #[test]
    fn test_oversized_declared_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16(MAGIC);
        buf.put_u32(1024);

        let mut codec = RemotingCodec::new().with_max_body_length(64);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::Protocol(ProtocolError::BadLength { .. }))
        ));
    }

    #[test]
    fn test_zero_length_body_omitted() {
        let frame = Frame::heartbeat_request(5);
        let encoded = encode(&frame);
        assert_eq!(encoded.len(), PREAMBLE_LENGTH + HEADER_LENGTH);
        let decoded = decode_one(&encoded);
        assert!(decoded.body().is_empty());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_back_to_back_frames_decode_separately() {
        let first = Frame::request(1, 1, 0, 0, false, Bytes::from_static(b"one")).unwrap();
        let second = Frame::request(2, 2, 0, 0, true, Bytes::from_static(b"two")).unwrap();

        let mut buf = BytesMut::new();
        buf.put_slice(&encode(&first));
        buf.put_slice(&encode(&second));

        let mut codec = RemotingCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), second);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn roundtrip_over_full_field_domain(
            request in any::<bool>(),
            oneway in any::<bool>(),
            heartbeat in any::<bool>(),
            serialize_type in 0u8..=31,
            packet_id in any::<i32>(),
            opcode in any::<i16>(),
            compress_type in 0u8..=15,
            lang_type in 0u8..=15,
            body in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let mut flags = serialize_type;
            if request { flags |= 0x80; }
            if oneway { flags |= 0x40; }
            if heartbeat { flags |= 0x20; }
            let tag = compress_type << 4 | lang_type;
            let frame = Frame::from_wire(flags, packet_id, opcode, tag, Bytes::from(body));

            let decoded = decode_one(&encode(&frame));
            prop_assert_eq!(decoded, frame);
        }
    }
}
