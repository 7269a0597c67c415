//! Codec module - CBOR serialization for the device wire format.
//!
//! The device speaks self-describing CBOR with no length prefix or
//! delimiter, so beyond plain encode/decode the codec exposes
//! [`CborCodec::decode_prefix`], which classifies a failed decode of a
//! byte prefix as either "truncated, feed more bytes" or "structurally
//! invalid" - the distinction the frame detector is built on.

mod cbor;

pub use cbor::{CborCodec, DecodeAttempt};
