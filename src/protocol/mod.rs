//! Protocol module - message shapes and frame-boundary detection.
//!
//! This module implements the device wire protocol:
//! - Request/Message CBOR map shapes with id/method limits
//! - Incremental frame detector for the self-delimiting byte stream
//! - Extended-data (`seqnum`/`seqlen`) and redirection payload accessors

mod detector;
mod message;

pub use detector::FrameDetector;
pub use message::{
    HttpRequest, Message, Request, RpcError, GET_EXTENDED_DATA, HTTP_REQUEST_KEY, MAX_ID_LEN,
    MAX_METHOD_LEN,
};
