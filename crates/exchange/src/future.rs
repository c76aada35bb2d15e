//! The caller-visible handle for a pending call.
//!
//! One completion primitive, two consumption modes: await the result with
//! a bound, or arm a callback and let the kernel invoke it exactly once.

use crate::error::Error;
use crate::tracer::CallResult;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Callback invoked exactly once with the call's terminal value.
pub type ResponseCallback = Box<dyn FnOnce(CallResult) + Send + 'static>;

/// Handle for an outstanding two-way call.
pub struct ResponseFuture {
    packet_id: i32,
    rx: oneshot::Receiver<CallResult>,
}

impl ResponseFuture {
    pub(crate) fn new(packet_id: i32, rx: oneshot::Receiver<CallResult>) -> Self {
        Self { packet_id, rx }
    }

    /// The packet identifier this future correlates with.
    #[must_use]
    pub const fn packet_id(&self) -> i32 {
        self.packet_id
    }

    /// Wait for the call to complete, bounded by `timeout`.
    ///
    /// Returns [`Error::Timeout`] if this wait expires, and
    /// [`Error::ChannelClosed`] if the kernel released the pending call
    /// without completing it.
    pub async fn await_response(self, timeout: Duration) -> CallResult {
        match tokio::time::timeout(timeout, self.rx).await {
            Err(_) => Err(Error::Timeout(timeout)),
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Ok(Ok(result)) => result,
        }
    }

    /// Arm an asynchronous completion path.
    ///
    /// The callback is invoked exactly once, with the result, a failure,
    /// or [`Error::Timeout`], no later than `timeout` after arming.
    pub fn set_callback(self, callback: ResponseCallback, timeout: Duration) {
        let packet_id = self.packet_id;
        tokio::spawn(async move {
            let result = self.await_response(timeout).await;
            debug!("invoking callback for packet {}", packet_id);
            callback(result);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn pending(packet_id: i32) -> (oneshot::Sender<CallResult>, ResponseFuture) {
        let (tx, rx) = oneshot::channel();
        (tx, ResponseFuture::new(packet_id, rx))
    }

    #[tokio::test]
    async fn test_await_resolves_with_sent_value() {
        let (tx, future) = pending(1);
        tx.send(Ok(Bytes::from_static(b"value"))).unwrap();
        let result = future.await_response(Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), Bytes::from_static(b"value"));
    }

    #[tokio::test]
    async fn test_await_times_out() {
        let (_tx, future) = pending(1);
        let result = future.await_response(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_dropped_sender_is_channel_closed() {
        let (tx, future) = pending(1);
        drop(tx);
        let result = future.await_response(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_callback_invoked_once_with_result() {
        let (tx, future) = pending(1);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        future.set_callback(
            Box::new(move |result| {
                seen_tx.send(result).unwrap();
            }),
            Duration::from_secs(1),
        );
        tx.send(Ok(Bytes::from_static(b"cb"))).unwrap();

        let first = seen_rx.recv().await.unwrap();
        assert_eq!(first.unwrap(), Bytes::from_static(b"cb"));
        // Sender side of the callback channel is consumed with the
        // callback, so a second delivery is impossible
        assert!(seen_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_callback_receives_timeout() {
        let (_tx, future) = pending(1);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        future.set_callback(
            Box::new(move |result| {
                seen_tx.send(result).unwrap();
            }),
            Duration::from_millis(10),
        );

        let result = seen_rx.recv().await.unwrap();
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
