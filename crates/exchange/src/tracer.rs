//! Pending-call registry.
//!
//! One shared structure maps every outstanding packet identifier to the
//! continuation awaiting its result. All connections' inbound dispatch
//! paths complete calls through here, so exactly one of "completed by
//! response", "completed by expiry", or "completed by local write failure"
//! wins for any given call.

use crate::error::{Error, Result, ValidationError};
use crate::future::ResponseFuture;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Terminal value of a two-way call: the response body, or the failure
/// that ended it. Success and failure share this one channel.
pub type CallResult = std::result::Result<Bytes, Error>;

struct PendingCall {
    tx: oneshot::Sender<CallResult>,
}

/// Registry of outstanding two-way calls, keyed by packet identifier.
#[derive(Default)]
pub struct Tracer {
    pending: DashMap<i32, PendingCall>,
}

impl Tracer {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending call and hand back its future.
    ///
    /// Must be called strictly before the frame carrying `packet_id` is
    /// handed to the transport, so a reply arriving immediately still
    /// finds the call.
    ///
    /// # Errors
    ///
    /// Fails if a call with this identifier is already outstanding.
    pub fn register(&self, packet_id: i32) -> Result<ResponseFuture> {
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(packet_id) {
            Entry::Occupied(_) => Err(ValidationError::DuplicatePacketId(packet_id).into()),
            Entry::Vacant(slot) => {
                slot.insert(PendingCall { tx });
                Ok(ResponseFuture::new(packet_id, rx))
            }
        }
    }

    /// Complete the pending call for `packet_id`, removing it.
    ///
    /// Returns whether a pending call was found. A miss is not an error:
    /// it happens on duplicate deliveries and post-timeout arrivals.
    pub fn complete(&self, packet_id: i32, result: CallResult) -> bool {
        match self.pending.remove(&packet_id) {
            Some((_, call)) => {
                // The caller may have dropped its future already
                let _ = call.tx.send(result);
                true
            }
            None => {
                warn!("no pending call for packet {}, dropping completion", packet_id);
                false
            }
        }
    }

    /// Fail the call with a timeout if it is still pending.
    pub fn expire(&self, packet_id: i32, timeout: Duration) {
        if let Some((_, call)) = self.pending.remove(&packet_id) {
            debug!("call {} expired after {:?}", packet_id, timeout);
            let _ = call.tx.send(Err(Error::Timeout(timeout)));
        }
    }

    /// Number of calls currently outstanding.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_complete_resolves_future() {
        let tracer = Tracer::new();
        let future = tracer.register(1).unwrap();

        assert!(tracer.complete(1, Ok(Bytes::from_static(b"ok"))));
        let result = future.await_response(Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), Bytes::from_static(b"ok"));
        assert_eq!(tracer.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_second_completion_is_a_noop() {
        let tracer = Tracer::new();
        let _future = tracer.register(1).unwrap();

        assert!(tracer.complete(1, Ok(Bytes::new())));
        assert!(!tracer.complete(1, Ok(Bytes::new())));
        tracer.expire(1, Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let tracer = Tracer::new();
        let _future = tracer.register(1).unwrap();
        assert!(matches!(
            tracer.register(1),
            Err(Error::Validation(ValidationError::DuplicatePacketId(1)))
        ));
    }

    #[tokio::test]
    async fn test_expire_delivers_timeout() {
        let tracer = Tracer::new();
        let future = tracer.register(1).unwrap();

        tracer.expire(1, Duration::from_millis(5));
        let result = future.await_response(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_concurrent_complete_and_expire_race() {
        for _ in 0..64 {
            let tracer = Arc::new(Tracer::new());
            let future = tracer.register(7).unwrap();

            let a = {
                let tracer = Arc::clone(&tracer);
                tokio::spawn(async move { tracer.complete(7, Ok(Bytes::from_static(b"r"))) })
            };
            let b = {
                let tracer = Arc::clone(&tracer);
                tokio::spawn(async move { tracer.expire(7, Duration::from_millis(1)) })
            };
            a.await.unwrap();
            b.await.unwrap();

            // Exactly one terminal transition wins; the future resolves once
            let result = future.await_response(Duration::from_secs(1)).await;
            assert!(matches!(result, Ok(_) | Err(Error::Timeout(_))));
            assert_eq!(tracer.outstanding(), 0);
        }
    }
}
