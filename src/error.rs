//! Error types for keywire.

use thiserror::Error;

/// Main error type for all keywire operations.
#[derive(Debug, Error)]
pub enum KeywireError {
    /// I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CBOR serialization error.
    #[error("CBOR encode error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    /// CBOR deserialization error.
    #[error("CBOR decode error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    /// Malformed request rejected before anything reaches the wire
    /// (bad id/method length, or an id that is already pending).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Protocol violation (unmergeable chunk payload, malformed
    /// redirection instruction, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Bounded-policy deadline elapsed with no matching response.
    #[error("RPC call timed out")]
    Timeout,

    /// Error response from the device, passed through verbatim.
    #[error("RPC Error {code}: {message}")]
    Device {
        /// Device-reported error code.
        code: i64,
        /// Device-reported error message.
        message: String,
    },

    /// Extended-data chunk order or declared length mismatch.
    #[error("Sequencing error: {0}")]
    Sequencing(String),

    /// The device asked for an external HTTP action but no runner was supplied.
    #[error("HTTP request runner not provided")]
    HttpBridgeMissing,

    /// Connection closed while a call was in flight.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using KeywireError.
pub type Result<T> = std::result::Result<T, KeywireError>;
