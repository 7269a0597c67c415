//! CBOR codec using `ciborium`.
//!
//! # Example
//!
//! ```
//! use keywire::codec::CborCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Message {
//!     id: u32,
//!     content: String,
//! }
//!
//! let msg = Message { id: 42, content: "hello".to_string() };
//! let encoded = CborCodec::encode(&msg).unwrap();
//! let decoded: Message = CborCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use ciborium::Value;

use crate::error::Result;

/// Outcome of attempting to decode one CBOR value from a byte prefix.
#[derive(Debug)]
pub enum DecodeAttempt {
    /// A complete value was decoded from the prefix.
    Complete(Value),
    /// The prefix is a truncated encoding; more bytes are needed.
    Incomplete,
    /// The prefix can never decode as CBOR (desynchronized stream).
    Invalid(String),
}

/// CBOR codec for structured data.
///
/// Structs are serialized as maps with text keys, matching the request
/// shape the device firmware expects.
pub struct CborCodec;

impl CborCodec {
    /// Encode a value to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)?;
        Ok(buf)
    }

    /// Decode CBOR bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(ciborium::from_reader(bytes)?)
    }

    /// Try to decode a single CBOR value from a byte prefix, classifying
    /// failure as truncation vs. structural invalidity.
    ///
    /// Truncation surfaces from `ciborium` as an `UnexpectedEof` I/O error
    /// (the slice reader ran out of bytes mid-structure). Everything else
    /// means the bytes can never form a valid value no matter how many
    /// more arrive.
    pub fn decode_prefix(bytes: &[u8]) -> DecodeAttempt {
        match ciborium::from_reader::<Value, _>(bytes) {
            Ok(value) => DecodeAttempt::Complete(value),
            Err(ciborium::de::Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                DecodeAttempt::Incomplete
            }
            Err(e) => DecodeAttempt::Invalid(e.to_string()),
        }
    }
}
