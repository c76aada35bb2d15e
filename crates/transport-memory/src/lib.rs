//! In-memory transport implementation for testing
//!
//! This transport routes frames between endpoints within the same process,
//! perfect for testing and development scenarios. Besides plain delivery it
//! supports write-fault injection (stalled or failing writes) so the
//! exchange kernel's timeout and failure-funneling paths can be exercised
//! deterministically.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use skiff_transport::{Connection, Listener, SendReceipt, Transport, TransportError};
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Global registry of memory listeners for cross-connection routing
static GLOBAL_REGISTRY: once_cell::sync::Lazy<Arc<DashMap<String, MemoryListener>>> =
    once_cell::sync::Lazy::new(|| Arc::new(DashMap::new()));

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(0);

const CHANNEL_CAPACITY: usize = 1024;

/// Configuration for memory transport
#[derive(Debug, Clone, Default)]
pub struct MemoryOptions {
    /// Address to listen on (if acting as a listener)
    pub listen_addr: Option<String>,
}

/// Memory transport implementation
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    options: MemoryOptions,
}

impl MemoryTransport {
    /// Create a new memory transport with options
    #[must_use]
    pub fn new(options: MemoryOptions) -> Self {
        Self { options }
    }

    /// Clear all global state (useful for tests)
    pub fn clear_global_state() {
        GLOBAL_REGISTRY.clear();
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn Connection>, TransportError> {
        debug!("Connecting to memory listener at {}", addr);

        // Clone out of the registry so the map ref is not held across await
        let listener = GLOBAL_REGISTRY
            .get(addr)
            .map(|entry| entry.clone())
            .ok_or_else(|| TransportError::ConnectFailed {
                addr: addr.to_string(),
                reason: "no listener".to_string(),
            })?;

        let (client, server) = MemoryConnection::pair();
        let server: Arc<dyn Connection> = server;

        listener
            .incoming_tx
            .send_async(server)
            .await
            .map_err(|_| TransportError::ConnectFailed {
                addr: addr.to_string(),
                reason: "listener closed".to_string(),
            })?;

        info!("Memory connection established to {}", addr);

        Ok(client)
    }

    async fn listen(&self) -> Result<Box<dyn Listener>, TransportError> {
        let addr = self
            .options
            .listen_addr
            .clone()
            .ok_or_else(|| TransportError::InvalidAddress("no listen address configured".into()))?;

        if GLOBAL_REGISTRY.contains_key(&addr) {
            return Err(TransportError::InvalidAddress(format!(
                "{addr} already has a listener"
            )));
        }

        let (incoming_tx, incoming_rx) = flume::unbounded();
        let listener = MemoryListener {
            addr: addr.clone(),
            incoming_tx,
            incoming_rx,
            closed: Arc::new(AtomicBool::new(false)),
        };

        GLOBAL_REGISTRY.insert(addr.clone(), listener.clone());
        info!("Memory listener created at {}", addr);

        Ok(Box::new(listener))
    }
}

/// Injected behavior for outbound writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteFault {
    /// Deliver normally.
    None,
    /// Never complete the write; resolve only when cancelled.
    Stall,
    /// Fail the write immediately without delivering.
    Fail,
}

/// Memory connection implementation
pub struct MemoryConnection {
    id: u64,
    initiator: bool,
    outbound: Mutex<Option<flume::Sender<Bytes>>>,
    inbound: flume::Receiver<Bytes>,
    closed: AtomicBool,
    idle_timeout: Mutex<Option<Duration>>,
    fault: Mutex<WriteFault>,
    cancelled_writes: Arc<AtomicUsize>,
}

impl Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("initiator", &self.initiator)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl MemoryConnection {
    fn new(initiator: bool, outbound: flume::Sender<Bytes>, inbound: flume::Receiver<Bytes>) -> Self {
        Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            initiator,
            outbound: Mutex::new(Some(outbound)),
            inbound,
            closed: AtomicBool::new(false),
            idle_timeout: Mutex::new(None),
            fault: Mutex::new(WriteFault::None),
            cancelled_writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a connected pair of in-process connections.
    ///
    /// The first element is the initiating side. Handy for tests that do
    /// not need listener plumbing.
    #[must_use]
    pub fn pair() -> (Arc<MemoryConnection>, Arc<MemoryConnection>) {
        let (a_tx, b_rx) = flume::bounded(CHANNEL_CAPACITY);
        let (b_tx, a_rx) = flume::bounded(CHANNEL_CAPACITY);
        let a = Arc::new(Self::new(true, a_tx, a_rx));
        let b = Arc::new(Self::new(false, b_tx, b_rx));
        (a, b)
    }

    /// Make subsequent writes hang until cancelled.
    pub fn stall_writes(&self) {
        *self.fault.lock() = WriteFault::Stall;
    }

    /// Make subsequent writes fail immediately.
    pub fn fail_writes(&self) {
        *self.fault.lock() = WriteFault::Fail;
    }

    /// Restore normal write behavior.
    pub fn clear_write_fault(&self) {
        *self.fault.lock() = WriteFault::None;
    }

    /// How many in-flight writes have been cancelled on this connection.
    #[must_use]
    pub fn cancelled_write_count(&self) -> usize {
        self.cancelled_writes.load(Ordering::SeqCst)
    }

    /// The idle timeout most recently applied to this connection.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        *self.idle_timeout.lock()
    }

    fn push(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }
        let guard = self.outbound.lock();
        match guard.as_ref() {
            Some(tx) => tx.try_send(frame).map_err(|e| match e {
                flume::TrySendError::Full(_) => {
                    TransportError::SendFailed("outbound queue full".to_string())
                }
                flume::TrySendError::Disconnected(_) => TransportError::ConnectionClosed,
            }),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    fn close_now(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Closing memory connection {}", self.id);
            // Dropping the sender ends the peer's recv loop
            self.outbound.lock().take();
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, frame: Bytes) -> SendReceipt {
        match *self.fault.lock() {
            WriteFault::Fail => {
                SendReceipt::resolved(Err(TransportError::SendFailed("injected".to_string())))
            }
            WriteFault::Stall => {
                let (ack, receipt) = SendReceipt::channel();
                let cancelled = Arc::clone(&self.cancelled_writes);
                tokio::spawn(async move {
                    ack.cancelled().await;
                    cancelled.fetch_add(1, Ordering::SeqCst);
                    ack.complete(Err(TransportError::SendCancelled));
                });
                receipt
            }
            WriteFault::None => SendReceipt::resolved(self.push(frame)),
        }
    }

    fn send_detached(&self, frame: Bytes) {
        if *self.fault.lock() != WriteFault::None {
            return;
        }
        if let Err(e) = self.push(frame) {
            debug!("Detached send on connection {} dropped: {}", self.id, e);
        }
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }
        match self.inbound.recv_async().await {
            Ok(frame) => {
                debug!(
                    "Memory connection {} received {} bytes",
                    self.id,
                    frame.len()
                );
                Ok(frame)
            }
            Err(_) => {
                self.closed.store(true, Ordering::Release);
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn is_initiator(&self) -> bool {
        self.initiator
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn set_idle_timeout(&self, timeout: Duration) {
        *self.idle_timeout.lock() = Some(timeout);
    }

    async fn close(&self) {
        self.close_now();
    }

    async fn close_graceful(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let pending = self.outbound.lock().as_ref().map_or(0, flume::Sender::len);
            if pending == 0 || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        self.close_now();
    }
}

/// Memory listener implementation
#[derive(Clone)]
pub struct MemoryListener {
    addr: String,
    incoming_tx: flume::Sender<Arc<dyn Connection>>,
    incoming_rx: flume::Receiver<Arc<dyn Connection>>,
    closed: Arc<AtomicBool>,
}

impl Debug for MemoryListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryListener")
            .field("addr", &self.addr)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&self) -> Result<Arc<dyn Connection>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ListenerClosed);
        }
        match self.incoming_rx.recv_async().await {
            Ok(conn) => {
                info!("Memory listener at {} accepted a connection", self.addr);
                Ok(conn)
            }
            Err(_) => Err(TransportError::ListenerClosed),
        }
    }

    async fn close(&self) {
        debug!("Closing memory listener at {}", self.addr);
        self.closed.store(true, Ordering::Release);
        GLOBAL_REGISTRY.remove(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_delivers_in_order() {
        let (a, b) = MemoryConnection::pair();
        assert!(a.is_initiator());
        assert!(!b.is_initiator());

        a.send(Bytes::from_static(b"one")).outcome().await.unwrap();
        a.send(Bytes::from_static(b"two")).outcome().await.unwrap();

        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn injected_failure_resolves_receipt() {
        let (a, _b) = MemoryConnection::pair();
        a.fail_writes();
        let outcome = a.send(Bytes::from_static(b"x")).outcome().await;
        assert!(matches!(outcome, Err(TransportError::SendFailed(_))));
    }

    #[tokio::test]
    async fn stalled_write_resolves_only_on_cancel() {
        let (a, _b) = MemoryConnection::pair();
        a.stall_writes();
        let receipt = a.send(Bytes::from_static(b"x"));
        let outcome = receipt.wait(Duration::from_millis(20)).await;
        assert!(matches!(outcome, Err(TransportError::SendCancelled)));
        // The fault task records the cancellation asynchronously
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.cancelled_write_count(), 1);
    }

    #[tokio::test]
    async fn close_severs_peer_recv() {
        let (a, b) = MemoryConnection::pair();
        a.close().await;
        assert!(!a.is_active());
        assert!(matches!(
            b.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
