//! # keywire
//!
//! Client-side protocol engine for talking to a hardware security device
//! over an unreliable, byte-oriented transport (e.g. a serial port).
//!
//! The engine turns a raw, possibly fragmented byte stream into discrete
//! CBOR messages, correlates outgoing calls with their asynchronous
//! replies, reassembles multi-chunk ("extended") responses, and follows
//! the device's HTTP-redirection instructions through an arbitrary
//! number of round-trips.
//!
//! ## Architecture
//!
//! - **Frame detector**: finds message boundaries in a self-delimiting
//!   stream with no length prefix, by decoding a growing buffer prefix
//! - **Correlator**: one-shot waiter per correlation id, with bounded or
//!   unbounded timeout policies
//! - **Extended data**: sequential `get_extended_data` chunk fetches,
//!   validated and merged into one logical response
//! - **Redirection trampoline**: an iterative loop handing `http_request`
//!   instructions to a caller-supplied runner
//!
//! ## Example
//!
//! ```ignore
//! use keywire::{CallOptions, Client};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = open_serial_port()?; // any AsyncRead + AsyncWrite
//!     let client = Client::connect(port);
//!
//!     let result = client.call("ping", None, CallOptions::default()).await?;
//!     println!("{:?}", result);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod correlator;
pub mod error;
pub mod protocol;
pub mod transport;

mod client;
mod extended;
mod writer;

pub use client::{BoxFuture, CallOptions, Client, ClientBuilder, HttpRunner};
pub use correlator::{Correlator, TimeoutPolicy, DEFAULT_CALL_TIMEOUT};
pub use error::{KeywireError, Result};
pub use protocol::{Message, Request, RpcError};
pub use writer::{spawn_writer_task, WriterHandle};
