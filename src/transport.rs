//! Transport input path.
//!
//! The physical connection (port enumeration, open/close, permissions)
//! belongs to the caller; the engine takes any `AsyncRead + AsyncWrite`
//! stream - a serial port handle in production, `tokio::io::duplex` in
//! tests - and owns only the read loop feeding the frame detector.
//! Transport-level message boundaries are never assumed; all boundary
//! detection happens in [`FrameDetector`].

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::correlator::Correlator;
use crate::error::{KeywireError, Result};
use crate::protocol::FrameDetector;

/// Default read buffer size for one transport read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024;

/// Read raw byte chunks until end-of-stream, feeding the frame detector
/// and dispatching every extracted message to the correlator.
///
/// On clean EOF or a read error, the detector's remaining bytes get one
/// final salvage pass before the loop returns, so a message that arrived
/// whole just before the device disconnected is still delivered.
pub(crate) async fn read_loop<R>(
    mut reader: R,
    correlator: Arc<Correlator>,
    buffer_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut detector = FrameDetector::new();
    let mut buf = vec![0u8; buffer_size];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                for msg in detector.finish() {
                    correlator.dispatch(msg);
                }
                return Ok(());
            }
            Ok(n) => {
                for msg in detector.feed(&buf[..n]) {
                    correlator.dispatch(msg);
                }
            }
            Err(e) => {
                // Treat a read error like a close: salvage, then surface.
                for msg in detector.finish() {
                    correlator.dispatch(msg);
                }
                return Err(KeywireError::Io(e));
            }
        }
    }
}
