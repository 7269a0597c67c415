//! Request/response correlation with per-call timeout.
//!
//! Each outgoing request registers a one-shot waiter keyed by its
//! correlation id; the transport's read path resolves the waiter via
//! [`Correlator::dispatch`] when a matching message arrives. The oneshot
//! sender is consumed on resolution, so at-most-one delivery per call is
//! structural rather than convention.
//!
//! Registration and dispatch both go through one mutex, so a message can
//! never be matched against a call that is concurrently timing out.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::codec::CborCodec;
use crate::error::{KeywireError, Result};
use crate::protocol::{Message, Request};
use crate::writer::WriterHandle;

/// Default deadline for bounded calls, from send time.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(5000);

/// Deadline policy for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Fail with [`KeywireError::Timeout`] after the given duration.
    Bounded(Duration),
    /// No deadline; used for calls awaiting user interaction on the
    /// device. Callers needing wall-clock bounds must layer their own.
    Unbounded,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::Bounded(DEFAULT_CALL_TIMEOUT)
    }
}

/// Correlates outgoing requests with their asynchronous replies.
pub struct Correlator {
    /// Pending one-shot waiters keyed by correlation id.
    pending: Mutex<HashMap<String, oneshot::Sender<Message>>>,
    /// Byte-send path to the transport.
    writer: WriterHandle,
}

impl Correlator {
    /// Create a correlator sending through the given writer.
    pub fn new(writer: WriterHandle) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            writer,
        }
    }

    /// Send a request and await the first message with a matching id.
    ///
    /// Exactly one message resolves the call; the registration is removed
    /// the moment it matches, so a device retransmission for the same id
    /// is dropped as orphaned.
    ///
    /// # Errors
    ///
    /// - [`KeywireError::Validation`] for a malformed id/method or an id
    ///   that is already pending - nothing is sent in either case.
    /// - [`KeywireError::Timeout`] when a bounded deadline elapses.
    /// - [`KeywireError::ConnectionClosed`] when the transport goes away
    ///   while the call is in flight.
    pub async fn call(&self, request: &Request, timeout: TimeoutPolicy) -> Result<Message> {
        request.validate()?;

        let rx = self.register(&request.id)?;

        let frame = match CborCodec::encode(request) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                self.deregister(&request.id);
                return Err(e);
            }
        };
        if let Err(e) = self.writer.send(frame).await {
            self.deregister(&request.id);
            return Err(e);
        }

        tracing::debug!(id = %request.id, method = %request.method, "request sent");

        let outcome = match timeout {
            TimeoutPolicy::Bounded(deadline) => {
                match tokio::time::timeout(deadline, rx).await {
                    Ok(received) => received.map_err(|_| KeywireError::ConnectionClosed),
                    Err(_) => {
                        // Deregister so a late reply for this id does not
                        // leak into a later call reusing the id space.
                        self.deregister(&request.id);
                        Err(KeywireError::Timeout)
                    }
                }
            }
            TimeoutPolicy::Unbounded => rx.await.map_err(|_| KeywireError::ConnectionClosed),
        };

        outcome
    }

    /// Deliver one extracted message, completing the matching waiter.
    ///
    /// Invoked by the transport's read path only. Unmatched messages are
    /// logged and dropped: `log` frames at info (device firmware output),
    /// everything else as orphaned.
    pub fn dispatch(&self, message: Message) {
        if !message.id.is_empty() {
            let waiter = self
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&message.id);
            if let Some(tx) = waiter {
                // Receiver may have been dropped between timeout and
                // deregistration; the message is orphaned either way.
                let _ = tx.send(message);
                return;
            }
        }

        if let Some(log) = &message.log {
            tracing::info!(device_log = %log, "device log message");
        } else {
            tracing::debug!(id = %message.id, "dropping orphaned message");
        }
    }

    /// Fail every pending call when the transport closes.
    ///
    /// Dropping the senders wakes each waiter with a closed-channel
    /// error, surfaced as [`KeywireError::ConnectionClosed`].
    pub fn fail_all(&self) {
        let drained: Vec<String> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().map(|(id, _tx)| id).collect()
        };
        if !drained.is_empty() {
            tracing::warn!(count = drained.len(), "failing pending calls on close");
        }
    }

    /// Number of calls currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Register a one-shot waiter for the id.
    ///
    /// At most one call may be pending per id; sequential reuse (as the
    /// extended-data sub-calls do) is fine because each registration is
    /// removed before the next is installed.
    fn register(&self, id: &str) -> Result<oneshot::Receiver<Message>> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.contains_key(id) {
            return Err(KeywireError::Validation(format!(
                "a call with id {:?} is already pending",
                id
            )));
        }
        pending.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Remove a waiter registration, if still present.
    fn deregister(&self, id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::spawn_writer_task;
    use tokio::io::{duplex, AsyncReadExt};

    fn test_correlator() -> (Correlator, tokio::io::DuplexStream) {
        let (client, server) = duplex(4096);
        let (writer, _task) = spawn_writer_task(client);
        (Correlator::new(writer), server)
    }

    fn reply(id: &str, result: &str) -> Message {
        Message {
            id: id.to_string(),
            result: Some(ciborium::Value::Text(result.to_string())),
            ..Message::default()
        }
    }

    #[tokio::test]
    async fn test_call_resolved_by_matching_dispatch() {
        let (correlator, mut server) = test_correlator();
        let request = Request::new("r1", "ping", None);

        let call = correlator.call(&request, TimeoutPolicy::default());
        tokio::pin!(call);

        // Let the send complete, then deliver a non-matching and a
        // matching message.
        tokio::select! {
            _ = &mut call => panic!("resolved before any dispatch"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        correlator.dispatch(reply("other", "nope"));
        correlator.dispatch(reply("r1", "ok"));

        let msg = call.await.unwrap();
        assert_eq!(msg.result, Some(ciborium::Value::Text("ok".to_string())));

        // Request bytes actually hit the wire.
        let mut buf = vec![0u8; 256];
        let n = server.read(&mut buf).await.unwrap();
        let sent: Message = CborCodec::decode(&buf[..n]).unwrap();
        assert_eq!(sent.id, "r1");
        assert_eq!(sent.method.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn test_validation_failure_sends_nothing() {
        let (correlator, mut server) = test_correlator();
        let request = Request::new("", "ping", None);

        let err = correlator
            .call(&request, TimeoutPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, KeywireError::Validation(_)));
        assert_eq!(correlator.pending_count(), 0);

        // Nothing was written: the read side would block, so poll it with
        // a short timeout instead.
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_millis(20), server.read(&mut buf)).await;
        assert!(read.is_err(), "no bytes should reach the transport");
    }

    #[tokio::test]
    async fn test_duplicate_pending_id_rejected() {
        let (correlator, _server) = test_correlator();

        let first = Request::new("r1", "ping", None);
        let second = Request::new("r1", "ping", None);

        let pending = correlator.call(&first, TimeoutPolicy::Unbounded);
        tokio::pin!(pending);
        tokio::select! {
            _ = &mut pending => panic!("no reply was sent"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }

        let err = correlator
            .call(&second, TimeoutPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, KeywireError::Validation(_)));

        // The original call is unaffected.
        correlator.dispatch(reply("r1", "ok"));
        assert!(pending.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_after_bound_and_late_reply_is_inert() {
        let (correlator, _server) = test_correlator();
        let request = Request::new("r1", "ping", None);

        let started = tokio::time::Instant::now();
        let err = correlator
            .call(&request, TimeoutPolicy::Bounded(Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert!(matches!(err, KeywireError::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(correlator.pending_count(), 0);

        // A late-arriving reply finds no registration and is dropped.
        correlator.dispatch(reply("r1", "late"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_surfaces_connection_closed() {
        let (correlator, _server) = test_correlator();
        let request = Request::new("r1", "ping", None);

        let call = correlator.call(&request, TimeoutPolicy::Unbounded);
        tokio::pin!(call);
        tokio::select! {
            _ = &mut call => panic!("no reply was sent"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }

        correlator.fail_all();

        let err = call.await.unwrap_err();
        assert!(matches!(err, KeywireError::ConnectionClosed));
    }
}
