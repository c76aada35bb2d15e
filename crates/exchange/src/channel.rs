//! The public request/oneway/close surface bound to one logical connection.

use crate::control::RequestControl;
use crate::error::{Error, Result};
use crate::future::{ResponseCallback, ResponseFuture};
use crate::protocol::negotiate::ChannelRole;
use crate::protocol::{Frame, framing};
use crate::tracer::Tracer;
use bytes::Bytes;
use skiff_transport::{Connection, SendReceipt, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, instrument};
use uuid::Uuid;

const NEGOTIATE_IDLE: u8 = 0;
const NEGOTIATE_RUNNING: u8 = 1;
const NEGOTIATE_DONE: u8 = 2;

/// Per-channel identity and negotiation settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// 128-bit identifier shared by all connections representing this
    /// logical endpoint.
    pub logical_id: Uuid,
    /// Role this connection declares for itself.
    pub role: ChannelRole,
    /// Number of connections opened for this role group.
    pub connection_count: u16,
    /// Position of this connection within its role group.
    pub slot_index: u16,
    /// Idle timeout requested from the peer, in seconds.
    pub idle_timeout_secs: u8,
    /// Largest idle timeout this side will accept, in seconds.
    pub max_idle_timeout_secs: u8,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            logical_id: Uuid::new_v4(),
            role: ChannelRole::ReadWrite,
            connection_count: 1,
            slot_index: 0,
            idle_timeout_secs: 30,
            max_idle_timeout_secs: 120,
        }
    }
}

/// The request/oneway/close surface over one physical connection.
///
/// Cheap to share: all state is atomic or behind `Arc`.
pub struct ExchangeChannel {
    conn: Arc<dyn Connection>,
    tracer: Arc<Tracer>,
    config: ChannelConfig,
    next_packet_id: AtomicI32,
    closed: AtomicBool,
    negotiate_state: AtomicU8,
}

impl ExchangeChannel {
    /// Bind a channel over a connection, correlating calls through the
    /// given tracer.
    #[must_use]
    pub fn new(conn: Arc<dyn Connection>, tracer: Arc<Tracer>, config: ChannelConfig) -> Arc<Self> {
        Arc::new(Self {
            conn,
            tracer,
            config,
            next_packet_id: AtomicI32::new(0),
            closed: AtomicBool::new(false),
            negotiate_state: AtomicU8::new(NEGOTIATE_IDLE),
        })
    }

    /// Identifier of the underlying connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.conn.id()
    }

    /// This channel's identity and negotiation settings.
    #[must_use]
    pub const fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub(crate) const fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    /// Whether `close` has been called. Monotonic.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Open, not closed, and backed by an active connection.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.is_closed() && self.conn.is_active()
    }

    /// Local address of the underlying connection, if any.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.conn.local_addr()
    }

    /// Remote address of the underlying connection, if any.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.conn.remote_addr()
    }

    // Wraps on overflow; uniqueness among concurrently outstanding calls
    // assumes fewer than 2^32 are in flight at once.
    pub(crate) fn next_packet_id(&self) -> i32 {
        self.next_packet_id.fetch_add(1, Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    /// Send a one-way request: no response envelope will ever arrive.
    ///
    /// With `control.sent()`, blocks up to `control.timeout()` for
    /// local-write acknowledgment, cancelling the in-flight write on
    /// expiry. Otherwise transmission is fire-and-forget with no
    /// acknowledgment tracking.
    ///
    /// # Errors
    ///
    /// `Timeout` when the acknowledgment wait expires, `Interrupted` when
    /// it is severed, `ChannelClosed` after `close`.
    #[instrument(skip(self, body, control), fields(opcode = control.opcode()))]
    pub async fn oneway(&self, body: Bytes, control: &RequestControl) -> Result<()> {
        self.ensure_open()?;
        let frame = Frame::request(
            self.next_packet_id(),
            control.opcode(),
            control.serialize_type(),
            control.compress_type(),
            true,
            body,
        )?;
        let data = framing::encode(&frame);
        if control.sent() {
            self.wait_local_write(self.conn.send(data), control.timeout())
                .await
        } else {
            self.conn.send_detached(data);
            Ok(())
        }
    }

    /// Issue a two-way request and return its future.
    ///
    /// The pending call is registered before the frame can reach the
    /// transport. With `control.sent()` this blocks for local-write
    /// acknowledgment like [`ExchangeChannel::oneway`], but still returns
    /// the (possibly pending) future: remote completion is separate from
    /// local-write completion.
    ///
    /// # Errors
    ///
    /// As [`ExchangeChannel::oneway`]; transmission failures after return
    /// are delivered through the future instead.
    #[instrument(skip(self, body, control), fields(opcode = control.opcode()))]
    pub async fn request(&self, body: Bytes, control: &RequestControl) -> Result<ResponseFuture> {
        let (future, packet_id, data) = self.prepare_request(body, control)?;
        self.transmit_two_way(packet_id, data, control).await?;
        Ok(future)
    }

    /// Issue a two-way request whose result is delivered to `callback`.
    ///
    /// The callback is invoked exactly once within `control.timeout()`.
    ///
    /// # Errors
    ///
    /// As [`ExchangeChannel::request`].
    #[instrument(skip(self, body, callback, control), fields(opcode = control.opcode()))]
    pub async fn request_with_callback(
        &self,
        body: Bytes,
        callback: ResponseCallback,
        control: &RequestControl,
    ) -> Result<()> {
        let (future, packet_id, data) = self.prepare_request(body, control)?;
        future.set_callback(callback, control.timeout());
        self.transmit_two_way(packet_id, data, control).await
    }

    fn prepare_request(
        &self,
        body: Bytes,
        control: &RequestControl,
    ) -> Result<(ResponseFuture, i32, Bytes)> {
        self.ensure_open()?;
        let packet_id = self.next_packet_id();
        let frame = Frame::request(
            packet_id,
            control.opcode(),
            control.serialize_type(),
            control.compress_type(),
            false,
            body,
        )?;
        let data = framing::encode(&frame);

        // Trace before write: a reply arriving on the same tick must find
        // the pending call.
        let future = self.tracer.register(packet_id)?;

        let tracer = Arc::clone(&self.tracer);
        let deadline = control.timeout();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            tracer.expire(packet_id, deadline);
        });

        Ok((future, packet_id, data))
    }

    async fn transmit_two_way(
        &self,
        packet_id: i32,
        data: Bytes,
        control: &RequestControl,
    ) -> Result<()> {
        let receipt = self.conn.send(data);
        let cancel = receipt.cancellation();

        let (ack_tx, ack_rx) = oneshot::channel();
        let tracer = Arc::clone(&self.tracer);
        tokio::spawn(async move {
            let outcome = receipt.outcome().await;
            if let Err(cause) = &outcome {
                // Funnel the transport failure through the same completion
                // path as a genuine remote response.
                let synthetic = Frame::failure_response(packet_id, &cause.to_string());
                let message = synthetic
                    .failure_message()
                    .map(|(_, message)| message)
                    .unwrap_or_default();
                tracer.complete(packet_id, Err(Error::WriteFailure(message)));
            }
            let _ = ack_tx.send(outcome);
        });

        if control.sent() {
            match tokio::time::timeout(control.timeout(), ack_rx).await {
                Err(_) => {
                    cancel.cancel();
                    return Err(Error::Timeout(control.timeout()));
                }
                Ok(Err(_)) | Ok(Ok(Err(TransportError::AckSevered))) => {
                    return Err(Error::Interrupted);
                }
                // A completed-but-failed write already reached the future
                // through the funnel; the caller still gets the future
                Ok(Ok(_)) => {}
            }
        }
        Ok(())
    }

    async fn wait_local_write(&self, receipt: SendReceipt, timeout: Duration) -> Result<()> {
        let cancel = receipt.cancellation();
        match tokio::time::timeout(timeout, receipt.outcome()).await {
            Err(_) => {
                cancel.cancel();
                Err(Error::Timeout(timeout))
            }
            Ok(Err(TransportError::AckSevered)) => Err(Error::Interrupted),
            Ok(Err(cause)) => Err(cause.into()),
            Ok(Ok(())) => Ok(()),
        }
    }

    pub(crate) fn send_frame(&self, frame: &Frame) -> SendReceipt {
        self.conn.send(framing::encode(frame))
    }

    pub(crate) fn send_frame_detached(&self, frame: &Frame) {
        self.conn.send_detached(framing::encode(frame));
    }

    pub(crate) fn try_begin_negotiation(&self) -> bool {
        self.negotiate_state
            .compare_exchange(
                NEGOTIATE_IDLE,
                NEGOTIATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn finish_negotiation(&self) {
        self.negotiate_state.store(NEGOTIATE_DONE, Ordering::Release);
    }

    /// Close immediately. Idempotent; `is_closed` is set before return.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing exchange channel {}", self.id());
        self.conn.close().await;
    }

    /// Close, waiting up to `timeout` for queued writes to drain first.
    /// Idempotent.
    pub async fn close_graceful(&self, timeout: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing exchange channel {} within {:?}", self.id(), timeout);
        self.conn.close_graceful(timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_transport_memory::MemoryConnection;

    fn channel(conn: Arc<MemoryConnection>) -> Arc<ExchangeChannel> {
        ExchangeChannel::new(conn, Arc::new(Tracer::new()), ChannelConfig::default())
    }

    #[tokio::test]
    async fn test_packet_ids_are_sequential() {
        let (a, _b) = MemoryConnection::pair();
        let ch = channel(a);
        assert_eq!(ch.next_packet_id(), 0);
        assert_eq!(ch.next_packet_id(), 1);
        assert_eq!(ch.next_packet_id(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_monotonic() {
        let (a, _b) = MemoryConnection::pair();
        let ch = channel(a);
        assert!(!ch.is_closed());
        ch.close().await;
        assert!(ch.is_closed());
        ch.close().await;
        ch.close_graceful(Duration::from_millis(10)).await;
        assert!(ch.is_closed());
    }

    #[tokio::test]
    async fn test_operations_rejected_after_close() {
        let (a, _b) = MemoryConnection::pair();
        let ch = channel(a);
        ch.close().await;

        let control = RequestControl::new(1);
        assert!(matches!(
            ch.oneway(Bytes::new(), &control).await,
            Err(Error::ChannelClosed)
        ));
        assert!(matches!(
            ch.request(Bytes::new(), &control).await,
            Err(Error::ChannelClosed)
        ));
    }
}
