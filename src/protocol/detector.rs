//! Frame detector for a self-delimiting byte stream.
//!
//! The device wire format has no length prefix or delimiter: each frame
//! is exactly one CBOR value, so the only way to find frame boundaries is
//! to try decoding a growing prefix of the receive buffer until a value
//! completes. Uses `bytes::BytesMut` so consumed prefixes are split off
//! without reallocating the remainder.
//!
//! # Example
//!
//! ```ignore
//! use keywire::protocol::FrameDetector;
//!
//! let mut detector = FrameDetector::new();
//!
//! // Data arrives in arbitrary chunks from the serial port
//! for msg in detector.feed(&chunk) {
//!     println!("Got message for id {}", msg.id);
//! }
//! ```

use bytes::BytesMut;
use ciborium::Value;

use super::message::Message;
use crate::codec::{CborCodec, DecodeAttempt};

/// Keys that mark a decoded CBOR map as a protocol message rather than
/// noise on the line.
const RECOGNIZED_KEYS: [&str; 4] = ["error", "result", "log", "method"];

/// Incremental frame-boundary detector.
///
/// Feeds on raw byte chunks and emits complete decoded messages in
/// arrival order. Exclusively owns its receive buffer; the transport's
/// read loop is the only caller.
pub struct FrameDetector {
    /// Accumulated bytes not yet consumed by a frame.
    buffer: BytesMut,
}

impl FrameDetector {
    /// Create an empty detector.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Append newly read bytes and extract every complete frame now
    /// present in the buffer.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Message> {
        self.buffer.extend_from_slice(data);
        self.extract_all()
    }

    /// Salvage any trailing complete frames on end-of-stream.
    ///
    /// Called when the transport closes (possibly mid-response) so a
    /// message that arrived whole just before closure is not lost.
    /// Leftover bytes that never form a message are discarded.
    pub fn finish(&mut self) -> Vec<Message> {
        let messages = self.extract_all();
        self.buffer.clear();
        messages
    }

    /// Number of buffered, unconsumed bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Extraction loop: grow a candidate prefix one byte at a time until
    /// a value decodes, consume it, restart at length 1 on the remainder.
    fn extract_all(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        let mut index = 1;

        while index <= self.buffer.len() {
            match CborCodec::decode_prefix(&self.buffer[..index]) {
                DecodeAttempt::Complete(value) => {
                    if let Some(msg) = self.accept(value, index) {
                        messages.push(msg);
                    }
                    let _ = self.buffer.split_to(index);
                    index = 1;
                }
                DecodeAttempt::Incomplete => {
                    // Truncated structure; the next read may complete it.
                    index += 1;
                }
                DecodeAttempt::Invalid(reason) => {
                    // The stream cannot be resynchronized byte-by-byte
                    // without a delimiter, so the whole buffer goes.
                    tracing::warn!(
                        discarded = self.buffer.len(),
                        %reason,
                        "unrecoverable decode failure, discarding receive buffer"
                    );
                    self.buffer.clear();
                    break;
                }
            }
        }

        messages
    }

    /// Accept a decoded value as a message if it is a map carrying at
    /// least one recognized top-level key; anything else is noise.
    fn accept(&self, value: Value, frame_len: usize) -> Option<Message> {
        let recognized = match &value {
            Value::Map(entries) => entries.iter().any(|(k, _)| {
                matches!(k, Value::Text(t) if RECOGNIZED_KEYS.contains(&t.as_str()))
            }),
            _ => false,
        };
        if !recognized {
            tracing::warn!(frame_len, "dropping decoded value missing expected keys");
            return None;
        }

        match CborCodec::decode::<Message>(&self.buffer[..frame_len]) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!(frame_len, error = %e, "dropping malformed message frame");
                None
            }
        }
    }
}

impl Default for FrameDetector {
    fn default() -> Self {
        Self::new()
    }
}
