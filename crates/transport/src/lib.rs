//! Transport abstraction for the skiff exchange kernel
//!
//! This crate provides a transport-agnostic interface for exchanging whole
//! frames between peers. Specific transport implementations (in-memory, TCP,
//! etc.) are provided in separate crates.
//!
//! Transports handle:
//! - Delivery of encoded frames as opaque byte messages
//! - Send-completion notification with active cancellation
//! - Connection lifecycle (activity, addresses, close)
//!
//! The exchange kernel never sees sockets; it only sees [`Connection`]s.

pub mod error;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub use error::TransportError;

/// Outcome of an asynchronous send, as reported by the transport.
pub type SendOutcome = Result<(), TransportError>;

/// Producer half of a send-completion notification.
///
/// A transport holds the ack while the write is in flight and resolves it
/// exactly once. Dropping the ack without resolving it severs the waiter,
/// which observes [`TransportError::AckSevered`].
pub struct SendAck {
    tx: oneshot::Sender<SendOutcome>,
    cancel: CancellationToken,
}

impl SendAck {
    /// Resolve the pending send with the given outcome.
    pub fn complete(self, outcome: SendOutcome) {
        let _ = self.tx.send(outcome);
    }

    /// Whether the waiter has cancelled this write.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until the waiter cancels this write.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Consumer half of a send-completion notification.
///
/// Returned by [`Connection::send`]. The holder can await the outcome,
/// bound the wait, or actively cancel the in-flight write.
pub struct SendReceipt {
    rx: oneshot::Receiver<SendOutcome>,
    cancel: CancellationToken,
}

impl SendReceipt {
    /// Create a connected ack/receipt pair.
    #[must_use]
    pub fn channel() -> (SendAck, SendReceipt) {
        let (tx, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        (
            SendAck {
                tx,
                cancel: cancel.clone(),
            },
            SendReceipt { rx, cancel },
        )
    }

    /// Create a receipt that is already resolved.
    ///
    /// Useful for transports that complete writes synchronously.
    #[must_use]
    pub fn resolved(outcome: SendOutcome) -> SendReceipt {
        let (ack, receipt) = Self::channel();
        ack.complete(outcome);
        receipt
    }

    /// A token that cancels the in-flight write when triggered.
    ///
    /// The token can be cloned out before the receipt is moved into a
    /// completion task.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Actively cancel the in-flight write.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Await the outcome of the send.
    ///
    /// # Errors
    ///
    /// Returns the transport's failure cause, or
    /// [`TransportError::AckSevered`] if the transport dropped the ack
    /// without resolving it.
    pub async fn outcome(self) -> SendOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::AckSevered),
        }
    }

    /// Await the outcome, bounded by `timeout`.
    ///
    /// The in-flight write is actively cancelled when the bound elapses.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SendCancelled`] on expiry, otherwise as
    /// [`SendReceipt::outcome`].
    pub async fn wait(self, timeout: Duration) -> SendOutcome {
        let cancel = self.cancellation();
        match tokio::time::timeout(timeout, self.outcome()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                Err(TransportError::SendCancelled)
            }
        }
    }
}

/// A single physical connection carrying whole frames.
///
/// One send is one frame; transports must not split or merge messages in a
/// way that reorders them. Frames on a single connection arrive in send
/// order.
#[async_trait]
pub trait Connection: Send + Sync + Debug + 'static {
    /// Process-unique identifier for this connection.
    fn id(&self) -> u64;

    /// Enqueue a frame and return a completion receipt for the write.
    fn send(&self, frame: Bytes) -> SendReceipt;

    /// Enqueue a frame without completion tracking (fire and forget).
    fn send_detached(&self, frame: Bytes);

    /// Receive the next inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the connection is
    /// closed by either side.
    async fn recv(&self) -> Result<Bytes, TransportError>;

    /// Whether the connection is open and usable.
    fn is_active(&self) -> bool;

    /// Whether this side initiated the connection.
    fn is_initiator(&self) -> bool;

    /// Local address, if the transport has one.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Remote address, if the transport has one.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Reshape the connection's idle-detection policy.
    fn set_idle_timeout(&self, timeout: Duration);

    /// Close the connection immediately.
    async fn close(&self);

    /// Close the connection, waiting up to `timeout` for queued writes to
    /// drain first.
    async fn close_graceful(&self, timeout: Duration);
}

/// Accepts inbound connections.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Wait for the next inbound connection.
    ///
    /// # Errors
    ///
    /// Returns an error once the listener is closed.
    async fn accept(&self) -> Result<std::sync::Arc<dyn Connection>, TransportError>;

    /// Stop accepting connections.
    async fn close(&self);
}

/// Factory for outbound connections and listeners.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer is unreachable.
    async fn connect(&self, addr: &str) -> Result<std::sync::Arc<dyn Connection>, TransportError>;

    /// Start listening for inbound connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot bind.
    async fn listen(&self) -> Result<Box<dyn Listener>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receipt_resolves_ok() {
        let (ack, receipt) = SendReceipt::channel();
        ack.complete(Ok(()));
        assert!(receipt.outcome().await.is_ok());
    }

    #[tokio::test]
    async fn receipt_severed_when_ack_dropped() {
        let (ack, receipt) = SendReceipt::channel();
        drop(ack);
        assert!(matches!(
            receipt.outcome().await,
            Err(TransportError::AckSevered)
        ));
    }

    #[tokio::test]
    async fn wait_cancels_on_expiry() {
        let (ack, receipt) = SendReceipt::channel();
        let outcome = receipt.wait(Duration::from_millis(20)).await;
        assert!(matches!(outcome, Err(TransportError::SendCancelled)));
        assert!(ack.is_cancelled());
    }

    #[tokio::test]
    async fn resolved_receipt_is_immediate() {
        let receipt = SendReceipt::resolved(Err(TransportError::ConnectionClosed));
        assert!(matches!(
            receipt.wait(Duration::from_secs(5)).await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
