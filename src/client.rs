//! Client builder and the top-level call surface.
//!
//! The [`ClientBuilder`] configures timeouts and buffer sizes and wires
//! the engine onto a byte stream. [`Client::call`] is the one public
//! entry point: it drives correlation, extended-data reassembly, and the
//! HTTP-redirection trampoline for a single logical call.
//!
//! # Example
//!
//! ```ignore
//! use keywire::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = open_serial_port()?; // any AsyncRead + AsyncWrite
//!     let client = Client::builder().connect(port);
//!
//!     let version = client
//!         .call("get_version_info", None, Default::default())
//!         .await?;
//!     println!("{:?}", version);
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use ciborium::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::correlator::{Correlator, TimeoutPolicy, DEFAULT_CALL_TIMEOUT};
use crate::error::{KeywireError, Result};
use crate::extended::resolve_extended;
use crate::protocol::Request;
use crate::transport::{read_loop, DEFAULT_READ_BUFFER_SIZE};
use crate::writer::spawn_writer_task;

/// Boxed future returned by [`HttpRunner`] implementations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// External action runner for redirection instructions.
///
/// When the device replies with an `http_request` instruction, the
/// engine hands the instruction's parameters to this runner and feeds
/// the returned body back to the device as the follow-up call's params.
/// The engine knows nothing about how the action is performed.
pub trait HttpRunner: Send + Sync {
    /// Perform the external action and return the response body.
    fn fetch(&self, params: Value) -> BoxFuture<'static, Result<Value>>;
}

impl<F, Fut> HttpRunner for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn fetch(&self, params: Value) -> BoxFuture<'static, Result<Value>> {
        Box::pin(self(params))
    }
}

/// Per-call options for [`Client::call`].
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Correlation id; engine-generated when absent. Concurrent calls
    /// must use distinct ids - the engine does not enforce uniqueness
    /// across callers.
    pub id: Option<String>,
    /// Disable the deadline, for calls awaiting on-device interaction.
    pub long_timeout: bool,
    /// Runner for redirection instructions; calls that never redirect
    /// can leave this unset.
    pub http_runner: Option<Arc<dyn HttpRunner>>,
}

/// Builder for configuring and connecting a client.
pub struct ClientBuilder {
    call_timeout: Duration,
    read_buffer_size: usize,
}

impl ClientBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    /// Set the deadline applied to bounded calls.
    ///
    /// Default: 5 seconds from send time.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the transport read buffer size.
    ///
    /// Default: 4 KiB.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Wire the engine onto an already-open byte stream.
    ///
    /// Spawns the writer task and the read loop; the stream is consumed.
    /// Closing the connection is the stream owner's concern - dropping
    /// the client tears both tasks down.
    pub fn connect<S>(self, stream: S) -> Client
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half);
        let correlator = Arc::new(Correlator::new(writer));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let dispatcher = correlator.clone();
        let buffer_size = self.read_buffer_size;

        tokio::spawn(async move {
            if let Err(e) = read_loop(reader, dispatcher.clone(), buffer_size).await {
                tracing::error!("read loop error: {}", e);
            }
            dispatcher.fail_all();
            let _ = shutdown_tx.send(());
        });

        Client {
            correlator,
            call_timeout: self.call_timeout,
            shutdown_rx,
            _writer_task: writer_task,
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected protocol engine.
pub struct Client {
    /// Pending-call registry plus send path.
    correlator: Arc<Correlator>,
    /// Deadline for bounded calls.
    call_timeout: Duration,
    /// Fires when the read loop exits (device disconnected).
    shutdown_rx: oneshot::Receiver<()>,
    /// Writer task handle.
    _writer_task: JoinHandle<Result<()>>,
}

impl Client {
    /// Create a client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect with default settings.
    pub fn connect<S>(stream: S) -> Client
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        ClientBuilder::new().connect(stream)
    }

    /// Make one logical call and return its terminal result.
    ///
    /// Transparently reassembles chunked responses and follows
    /// redirection instructions until the device produces a plain
    /// result. The redirection chain runs as a loop, so an adversarial
    /// device cannot grow the stack.
    ///
    /// # Errors
    ///
    /// Every stage of call processing surfaces here: validation,
    /// transport, timeout, sequencing, device errors (code and message
    /// verbatim), and [`KeywireError::HttpBridgeMissing`] when a
    /// redirection arrives with no runner configured.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        options: CallOptions,
    ) -> Result<Value> {
        let id = options.id.unwrap_or_else(generate_id);
        let timeout = if options.long_timeout {
            TimeoutPolicy::Unbounded
        } else {
            TimeoutPolicy::Bounded(self.call_timeout)
        };

        let mut request = Request::new(id.clone(), method, params);

        // Redirection trampoline: every hop is a full RPC call, possibly
        // itself chunked, reusing the same correlation id.
        loop {
            let mut reply = self.correlator.call(&request, timeout).await?;
            if reply.is_extended() {
                reply = resolve_extended(&self.correlator, reply, &id, timeout).await?;
            }

            if let Some(error) = reply.error.take() {
                return Err(KeywireError::Device {
                    code: error.code,
                    message: error.message,
                });
            }

            match reply.http_request()? {
                Some(instruction) => {
                    let runner = options
                        .http_runner
                        .as_ref()
                        .ok_or(KeywireError::HttpBridgeMissing)?;
                    tracing::debug!(id = %id, on_reply = %instruction.on_reply, "following redirection");
                    let body = runner.fetch(instruction.params).await?;
                    request = Request::new(id.clone(), instruction.on_reply, Some(body));
                }
                None => return Ok(reply.result.unwrap_or(Value::Null)),
            }
        }
    }

    /// Number of calls currently awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Wait until the transport closes.
    ///
    /// Consumes the client and resolves when the read loop exits.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        let _ = self.shutdown_rx.await;
        Ok(())
    }
}

/// Generate a correlation id: time-and-pid mixed, hex, well under the
/// 16-character limit.
fn generate_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    let mixed = nanos.wrapping_mul(0x517cc1b727220a95) ^ pid;

    format!("{:08x}", mixed as u32)
}
