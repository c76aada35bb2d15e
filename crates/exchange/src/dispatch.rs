//! Inbound dispatch: one loop per connection.
//!
//! Each decoded frame is inspected once and routed: responses complete a
//! pending call, heartbeats answer (and may carry negotiation), and
//! application requests are forwarded upward.

use crate::channel::{ChannelConfig, ExchangeChannel};
use crate::error::Result;
use crate::negotiation::Negotiator;
use crate::protocol::{Frame, RemotingCodec, opcode};
use crate::registry::ChannelRoleRegistry;
use crate::tracer::Tracer;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use skiff_transport::Connection;
use std::sync::Arc;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

/// Response produced by a [`RequestHandler`].
pub enum HandlerResponse {
    /// Reply with this payload.
    Payload(Bytes),
    /// No reply.
    None,
}

/// Application-side handler for inbound requests.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle an inbound application request.
    ///
    /// For two-way requests a [`HandlerResponse::Payload`] is sent back
    /// with the request's packet identifier; a handler error is answered
    /// with a failure response instead.
    ///
    /// # Errors
    ///
    /// Handler errors never tear down the connection.
    async fn handle_request(&self, opcode: i16, body: Bytes) -> Result<HandlerResponse>;
}

/// Shared kernel state: one pending-call tracer, role registry, and
/// negotiator serving every channel attached to it.
pub struct Exchange {
    tracer: Arc<Tracer>,
    registry: Arc<ChannelRoleRegistry>,
    negotiator: Arc<Negotiator>,
}

impl Exchange {
    /// Create a kernel with empty registries.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tracer: Arc::new(Tracer::new()),
            registry: Arc::new(ChannelRoleRegistry::new()),
            negotiator: Arc::new(Negotiator::new()),
        })
    }

    /// The shared pending-call registry.
    #[must_use]
    pub const fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    /// The shared channel role registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ChannelRoleRegistry> {
        &self.registry
    }

    /// The shared negotiator.
    #[must_use]
    pub const fn negotiator(&self) -> &Arc<Negotiator> {
        &self.negotiator
    }

    /// Bind a connection into the kernel.
    ///
    /// Spawns the connection's inbound dispatch loop and, on the
    /// initiating side, triggers negotiation. The returned channel is
    /// immediately usable; negotiation and application traffic are
    /// multiplexed over it.
    pub fn attach(
        self: &Arc<Self>,
        conn: Arc<dyn Connection>,
        config: ChannelConfig,
        handler: Arc<dyn RequestHandler>,
    ) -> Arc<ExchangeChannel> {
        let channel = ExchangeChannel::new(conn, Arc::clone(&self.tracer), config);
        let exchange = Arc::clone(self);
        let dispatch_channel = Arc::clone(&channel);
        tokio::spawn(async move {
            exchange.dispatch_loop(dispatch_channel, handler).await;
        });
        channel
    }

    async fn dispatch_loop(&self, channel: Arc<ExchangeChannel>, handler: Arc<dyn RequestHandler>) {
        if channel.connection().is_initiator() {
            self.negotiator.negotiate(&channel);
        }

        let mut codec = RemotingCodec::new();
        let mut buf = BytesMut::new();
        'outer: loop {
            let data = match channel.connection().recv().await {
                Ok(data) => data,
                Err(_) => break,
            };
            buf.extend_from_slice(&data);
            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(frame)) => {
                        if let Err(cause) = self.handle_frame(&channel, frame, &handler).await {
                            warn!(
                                "failed to handle inbound frame on channel {}, closing: {}",
                                channel.id(),
                                cause
                            );
                            break 'outer;
                        }
                    }
                    Ok(None) => break,
                    Err(cause) => {
                        // No resync on a malformed stream
                        warn!(
                            "protocol error on channel {}, closing: {}",
                            channel.id(),
                            cause
                        );
                        break 'outer;
                    }
                }
            }
        }

        channel.close().await;
        self.registry.remove_channel(channel.id());
        debug!("dispatch loop for channel {} ended", channel.id());
    }

    async fn handle_frame(
        &self,
        channel: &Arc<ExchangeChannel>,
        frame: Frame,
        handler: &Arc<dyn RequestHandler>,
    ) -> Result<()> {
        if frame.is_request() {
            if frame.is_heartbeat() {
                return self.handle_heartbeat(channel, &frame);
            }
            return Self::handle_application_request(channel, frame, handler).await;
        }

        if frame.is_heartbeat() {
            debug!("heartbeat response on channel {}", channel.id());
            return Ok(());
        }

        // Genuine remote response; the body stays opaque here
        let packet_id = frame.packet_id();
        self.tracer.complete(packet_id, Ok(frame.into_body()));
        Ok(())
    }

    fn handle_heartbeat(&self, channel: &Arc<ExchangeChannel>, frame: &Frame) -> Result<()> {
        if frame.opcode() == opcode::HEARTBEAT_WITH_NEGOTIATE {
            self.negotiator
                .handle_negotiate(channel, frame, &self.registry)?;
        }
        if !frame.is_oneway() {
            channel.send_frame_detached(&Frame::heartbeat_response(frame.packet_id()));
        }
        Ok(())
    }

    async fn handle_application_request(
        channel: &Arc<ExchangeChannel>,
        frame: Frame,
        handler: &Arc<dyn RequestHandler>,
    ) -> Result<()> {
        let packet_id = frame.packet_id();
        let oneway = frame.is_oneway();
        let opcode = frame.opcode();
        let serialize_type = frame.serialize_type();
        let compress_type = frame.compress_type();

        match handler.handle_request(opcode, frame.into_body()).await {
            Ok(HandlerResponse::Payload(payload)) if !oneway => {
                let reply =
                    Frame::response(packet_id, opcode, serialize_type, compress_type, payload)?;
                channel.send_frame_detached(&reply);
            }
            Ok(_) => {}
            Err(cause) => {
                warn!(
                    "handler failed for opcode {} on channel {}: {}",
                    opcode,
                    channel.id(),
                    cause
                );
                if !oneway {
                    channel
                        .send_frame_detached(&Frame::failure_response(packet_id, &cause.to_string()));
                }
            }
        }
        Ok(())
    }
}
