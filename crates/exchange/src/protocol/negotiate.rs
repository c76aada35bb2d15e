//! Negotiate-heartbeat body layout.
//!
//! Piggybacked on the reserved [`HEARTBEAT_WITH_NEGOTIATE`] opcode, the
//! body carries the sender's idle-timeout request and its channel-role
//! declaration:
//!
//! ```text
//! idleTimeout(1B) | idleMaxTimeout(1B) | logicalId(16B, two 8-byte halves)
//! | channelRole(1B: 0=read-write, 1=read, 2=write)
//! | connectionCount(2B) | slotIndex(2B)
//! ```
//!
//! [`HEARTBEAT_WITH_NEGOTIATE`]: crate::protocol::opcode::HEARTBEAT_WITH_NEGOTIATE

use crate::error::{ProtocolError, ValidationError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Fixed size of an encoded negotiation offer.
pub const NEGOTIATE_BODY_LENGTH: usize = 23;

/// Idle timeouts travel in one byte of whole seconds.
pub const MAX_IDLE_TIMEOUT_SECS: u8 = 0x7F;

/// Read/write classification of a physical connection relative to one
/// peer's logical identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelRole {
    /// The connection carries traffic in both directions.
    ReadWrite = 0,
    /// The declaring side only reads on this connection.
    Read = 1,
    /// The declaring side only writes on this connection.
    Write = 2,
}

impl ChannelRole {
    /// Wire code for this role.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ChannelRole {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::ReadWrite),
            1 => Ok(Self::Read),
            2 => Ok(Self::Write),
            _ => Err(ProtocolError::BadNegotiatePayload(format!(
                "unknown channel role {value:#04x}"
            ))),
        }
    }
}

/// One side's negotiation declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiateOffer {
    idle_timeout_secs: u8,
    max_idle_timeout_secs: u8,
    logical_id: Uuid,
    role: ChannelRole,
    connection_count: u16,
    slot_index: u16,
}

impl NegotiateOffer {
    /// Build an offer, range-checking the idle timeouts.
    ///
    /// # Errors
    ///
    /// Fails fast if either timeout falls outside `1..=127` seconds.
    pub fn new(
        idle_timeout_secs: u8,
        max_idle_timeout_secs: u8,
        logical_id: Uuid,
        role: ChannelRole,
        connection_count: u16,
        slot_index: u16,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            idle_timeout_secs: check_idle_timeout(idle_timeout_secs)?,
            max_idle_timeout_secs: check_idle_timeout(max_idle_timeout_secs)?,
            logical_id,
            role,
            connection_count,
            slot_index,
        })
    }

    /// Requested idle timeout, in seconds.
    #[must_use]
    pub const fn idle_timeout_secs(&self) -> u8 {
        self.idle_timeout_secs
    }

    /// Upper bound the sender will accept, in seconds.
    #[must_use]
    pub const fn max_idle_timeout_secs(&self) -> u8 {
        self.max_idle_timeout_secs
    }

    /// The sender's 128-bit logical endpoint identifier.
    #[must_use]
    pub const fn logical_id(&self) -> Uuid {
        self.logical_id
    }

    /// Declared role of this connection, from the sender's point of view.
    #[must_use]
    pub const fn role(&self) -> ChannelRole {
        self.role
    }

    /// How many connections the sender opened for this role group.
    #[must_use]
    pub const fn connection_count(&self) -> u16 {
        self.connection_count
    }

    /// Position of this connection within its role group.
    #[must_use]
    pub const fn slot_index(&self) -> u16 {
        self.slot_index
    }

    /// Encode into the fixed 23-byte layout.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(NEGOTIATE_BODY_LENGTH);
        buf.put_u8(self.idle_timeout_secs);
        buf.put_u8(self.max_idle_timeout_secs);
        let (hi, lo) = self.logical_id.as_u64_pair();
        buf.put_u64(hi);
        buf.put_u64(lo);
        buf.put_u8(self.role.code());
        buf.put_u16(self.connection_count);
        buf.put_u16(self.slot_index);
        buf.freeze()
    }

    /// Decode from a negotiate-heartbeat body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::BadNegotiatePayload`] for a body of the
    /// wrong size or an unknown role code.
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() != NEGOTIATE_BODY_LENGTH {
            return Err(ProtocolError::BadNegotiatePayload(format!(
                "expected {NEGOTIATE_BODY_LENGTH} bytes, got {}",
                body.len()
            )));
        }
        let mut buf = body;
        let idle_timeout_secs = buf.get_u8();
        let max_idle_timeout_secs = buf.get_u8();
        let hi = buf.get_u64();
        let lo = buf.get_u64();
        let role = ChannelRole::try_from(buf.get_u8())?;
        let connection_count = buf.get_u16();
        let slot_index = buf.get_u16();
        Ok(Self {
            idle_timeout_secs,
            max_idle_timeout_secs,
            logical_id: Uuid::from_u64_pair(hi, lo),
            role,
            connection_count,
            slot_index,
        })
    }
}

fn check_idle_timeout(secs: u8) -> Result<u8, ValidationError> {
    if secs == 0 || secs > MAX_IDLE_TIMEOUT_SECS {
        return Err(ValidationError::IdleTimeoutRange(secs));
    }
    Ok(secs)
}
