//! Per-connection handshake: idle timeout and channel role.
//!
//! Negotiation rides a reserved heartbeat opcode on the same channel as
//! application traffic; it is a side-channel, never a blocking prelude.

use crate::channel::ExchangeChannel;
use crate::error::Result;
use crate::protocol::Frame;
use crate::protocol::negotiate::{ChannelRole, NegotiateOffer};
use crate::registry::ChannelRoleRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Drives both sides of the handshake.
///
/// The client side transmits at most one negotiate-heartbeat per channel,
/// however many times activation is signalled; the responder applies the
/// peer's offer and registers role-split connections with the roles
/// inverted.
#[derive(Default)]
pub struct Negotiator {
    // Responder-side re-entrance markers, keyed by connection identity.
    // Removed unconditionally once the handshake step finishes.
    sessions: DashMap<u64, ()>,
}

impl Negotiator {
    /// Create a negotiator with no sessions in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Client-side trigger, invoked on connection activation.
    ///
    /// Safe to call concurrently and repeatedly: the channel's atomic
    /// handshake marker guards re-entrance, so exactly one
    /// negotiate-heartbeat is transmitted. The marker is torn down as soon
    /// as the send is on its way; the heartbeat round-trip itself is the
    /// higher-level timeout boundary.
    pub fn negotiate(&self, channel: &Arc<ExchangeChannel>) {
        if !channel.try_begin_negotiation() {
            return;
        }
        let cfg = channel.config();
        let offer = match NegotiateOffer::new(
            cfg.idle_timeout_secs,
            cfg.max_idle_timeout_secs,
            cfg.logical_id,
            cfg.role,
            cfg.connection_count,
            cfg.slot_index,
        ) {
            Ok(offer) => offer,
            Err(cause) => {
                warn!(
                    "negotiation setup failed on channel {}: {}",
                    channel.id(),
                    cause
                );
                channel.finish_negotiation();
                return;
            }
        };

        let frame = Frame::negotiate_request(channel.next_packet_id(), &offer);
        let receipt = channel.send_frame(&frame);
        channel.finish_negotiation();

        let channel = Arc::clone(channel);
        tokio::spawn(async move {
            if let Err(cause) = receipt.outcome().await {
                warn!(
                    "negotiate send failed on channel {}, closing: {}",
                    channel.id(),
                    cause
                );
                channel.close().await;
            }
        });
    }

    /// Responder side: apply an inbound negotiate-heartbeat.
    ///
    /// Applies the requested idle timeout to the connection and, for a
    /// role-split peer, registers the connection under the peer's logical
    /// identifier with the role inverted at the declared slot.
    pub(crate) fn handle_negotiate(
        &self,
        channel: &Arc<ExchangeChannel>,
        frame: &Frame,
        registry: &ChannelRoleRegistry,
    ) -> Result<()> {
        let session = channel.id();
        if self.sessions.insert(session, ()).is_some() {
            debug!("negotiation already in progress on channel {}", session);
            return Ok(());
        }
        let outcome = Self::apply_offer(channel, frame, registry);
        self.sessions.remove(&session);
        outcome
    }

    fn apply_offer(
        channel: &Arc<ExchangeChannel>,
        frame: &Frame,
        registry: &ChannelRoleRegistry,
    ) -> Result<()> {
        let offer = NegotiateOffer::decode(frame.body())?;

        channel
            .connection()
            .set_idle_timeout(Duration::from_secs(u64::from(offer.idle_timeout_secs())));

        match offer.role() {
            ChannelRole::ReadWrite => {}
            // Contrary to the remote peer: its write connection is this
            // side's read connection for the same byte stream.
            ChannelRole::Write => {
                registry.add_read_channel(offer.logical_id(), offer.slot_index(), Arc::clone(channel));
            }
            ChannelRole::Read => {
                registry.add_write_channel(
                    offer.logical_id(),
                    offer.slot_index(),
                    Arc::clone(channel),
                );
            }
        }

        debug!(
            "negotiated channel {}: idle {}s, role {:?}, slot {}",
            channel.id(),
            offer.idle_timeout_secs(),
            offer.role(),
            offer.slot_index()
        );
        Ok(())
    }
}
