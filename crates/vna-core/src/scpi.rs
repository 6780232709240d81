//! SCPI byte-stream transport for driver crates.
//!
//! This module provides shared types and utilities for async instrument
//! communication so driver crates do not duplicate them.
//!
//! # Types
//!
//! - [`ScpiIO`]: trait alias combining AsyncRead + AsyncWrite for instrument streams
//! - [`DynStream`]: type-erased boxed instrument stream
//! - [`SharedStream`]: thread-safe shared stream with buffered reading
//! - [`ScpiConnection`]: request/response adapter with per-call timeouts
//!
//! # Utilities
//!
//! - [`connect_tcp`]: open the instrument's SCPI socket (commonly port 5025)
//! - [`open_serial_async`]: open a serial port with spawn_blocking (`serial` feature)
//! - [`drain_stale`]: discard stale data from a stream
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use vna_core::scpi::{connect_tcp, wrap_shared, ScpiConnection};
//!
//! let stream = connect_tcp("192.168.1.50", 5025, "My VNA").await?;
//! let conn = ScpiConnection::new(wrap_shared(Box::new(stream)), Duration::from_secs(5));
//! let identity = conn.query("*IDN?").await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

// =============================================================================
// Stream Types
// =============================================================================

/// Trait alias for async instrument byte streams.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can carry
/// SCPI traffic. This includes:
/// - `tokio::net::TcpStream` (SCPI raw socket)
/// - `tokio_serial::SerialStream` (RS-232 instruments, `serial` feature)
/// - `tokio::io::DuplexStream` (testing)
pub trait ScpiIO: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ScpiIO for T {}

/// Type-erased boxed instrument stream.
pub type DynStream = Box<dyn ScpiIO>;

/// Thread-safe shared instrument stream with buffered reading.
///
/// The `BufReader` wrapper enables line-by-line reading for the ASCII side
/// of the protocol; raw block reads drain the same buffer first, so the two
/// never see bytes out of order.
pub type SharedStream = Arc<Mutex<BufReader<DynStream>>>;

/// Create a [`SharedStream`] from a type-erased stream.
pub fn wrap_shared(stream: DynStream) -> SharedStream {
    Arc::new(Mutex::new(BufReader::new(stream)))
}

// =============================================================================
// Connection Helpers
// =============================================================================

/// Connect to an instrument's SCPI socket.
///
/// Most LAN/USB instruments expose a raw SCPI socket on port 5025. Nagle's
/// algorithm is disabled so short commands are not held back by the kernel.
///
/// # Errors
///
/// Returns an error if the TCP connection cannot be established.
pub async fn connect_tcp(host: &str, port: u16, device_name: &str) -> anyhow::Result<TcpStream> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("Failed to connect to {} at {}:{}", device_name, host, port))?;
    stream
        .set_nodelay(true)
        .with_context(|| format!("Failed to disable Nagle on {} socket", device_name))?;
    Ok(stream)
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control. Port initialization
/// is wrapped in `spawn_blocking` to avoid stalling the async runtime.
///
/// # Errors
///
/// Returns an error if the port cannot be opened or spawn_blocking fails.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Discard stale data from a stream.
///
/// Reads and drops data until none is immediately available. Useful for
/// clearing buffers before a command sequence when the previous exchange may
/// have been aborted mid-response.
///
/// Returns the total number of bytes discarded.
pub async fn drain_stale<R: AsyncRead + Unpin>(stream: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        if tokio::time::Instant::now() >= deadline {
            break;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, stream.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF or no more data
            Ok(Ok(n)) => {
                total_discarded += n;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break, // Real I/O error, abort drain
            Err(_) => break,     // Timeout, no more immediate data
        }
    }

    total_discarded
}

// =============================================================================
// Request/Response Adapter
// =============================================================================

/// An error from a SCPI request/response exchange.
#[derive(Debug, Error)]
pub enum ScpiError {
    /// The instrument produced no response within the allotted time.
    #[error("'{command}' timed out after {after:?}")]
    Timeout {
        /// Command that was awaiting a response.
        command: String,
        /// Timeout that elapsed.
        after: Duration,
    },

    /// The connection was closed while a response was expected.
    #[error("connection closed by instrument during '{command}'")]
    Closed {
        /// Command in flight when the stream ended.
        command: String,
    },

    /// An I/O error on the underlying stream.
    #[error("I/O error during '{command}': {source}")]
    Io {
        /// Command in flight when the error occurred.
        command: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

fn io_error(command: &str, source: std::io::Error) -> ScpiError {
    ScpiError::Io {
        command: command.to_string(),
        source,
    }
}

/// A request/response adapter over a shared instrument stream.
///
/// Every exchange holds the stream lock for its full duration, so commands
/// issued from concurrent tasks never interleave on the wire. Responses are
/// `\n`-terminated ASCII except for [`query_raw`](Self::query_raw), which
/// collects an unframed byte response (e.g. a definite-length block).
#[derive(Clone)]
pub struct ScpiConnection {
    stream: SharedStream,
    timeout: Duration,
}

impl ScpiConnection {
    /// Idle window that ends a raw read once data has started flowing.
    const RAW_IDLE: Duration = Duration::from_millis(100);

    /// Create a connection with a default per-exchange timeout.
    pub fn new(stream: SharedStream, timeout: Duration) -> Self {
        Self { stream, timeout }
    }

    /// The default per-exchange timeout.
    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a command that expects no response.
    ///
    /// # Errors
    ///
    /// Returns [`ScpiError::Io`] if the write fails.
    pub async fn write(&self, command: &str) -> Result<(), ScpiError> {
        let mut guard = self.stream.lock().await;
        let writer = guard.get_mut();
        let framed = format!("{command}\n");
        writer
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| io_error(command, e))?;
        writer.flush().await.map_err(|e| io_error(command, e))?;
        tracing::trace!(command, "scpi write");
        Ok(())
    }

    /// Send a query and read one line of response, using the default timeout.
    ///
    /// # Errors
    ///
    /// See [`query_timeout`](Self::query_timeout).
    pub async fn query(&self, command: &str) -> Result<String, ScpiError> {
        self.query_timeout(command, self.timeout).await
    }

    /// Send a query and read one line of response within `timeout`.
    ///
    /// The response is returned with surrounding whitespace and the
    /// terminator trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`ScpiError::Timeout`] if no full line arrives in time,
    /// [`ScpiError::Closed`] on EOF, or [`ScpiError::Io`] on stream errors.
    pub async fn query_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ScpiError> {
        let mut guard = self.stream.lock().await;

        let writer = guard.get_mut();
        let framed = format!("{command}\n");
        writer
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| io_error(command, e))?;
        writer.flush().await.map_err(|e| io_error(command, e))?;

        let mut response = String::new();
        let n = tokio::time::timeout(timeout, guard.read_line(&mut response))
            .await
            .map_err(|_| ScpiError::Timeout {
                command: command.to_string(),
                after: timeout,
            })?
            .map_err(|e| io_error(command, e))?;
        if n == 0 {
            return Err(ScpiError::Closed {
                command: command.to_string(),
            });
        }

        tracing::trace!(command, response = response.trim(), "scpi query");
        Ok(response.trim().to_string())
    }

    /// Send a query and collect its raw byte response within `timeout`.
    ///
    /// The first byte may take the full `timeout` to arrive (a long sweep or
    /// file read on the instrument side); once data flows, reading stops when
    /// the link goes quiet. Any message terminator is returned as part of the
    /// buffer — block decoders ignore trailing bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ScpiError::Timeout`] if no data arrives at all,
    /// [`ScpiError::Closed`] if the stream ends before any data, or
    /// [`ScpiError::Io`] on stream errors.
    pub async fn query_raw(&self, command: &str, timeout: Duration) -> Result<Bytes, ScpiError> {
        let mut guard = self.stream.lock().await;

        let writer = guard.get_mut();
        let framed = format!("{command}\n");
        writer
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| io_error(command, e))?;
        writer.flush().await.map_err(|e| io_error(command, e))?;

        let mut data = Vec::new();
        let mut chunk = [0u8; 4096];

        let n = tokio::time::timeout(timeout, guard.read(&mut chunk))
            .await
            .map_err(|_| ScpiError::Timeout {
                command: command.to_string(),
                after: timeout,
            })?
            .map_err(|e| io_error(command, e))?;
        if n == 0 {
            return Err(ScpiError::Closed {
                command: command.to_string(),
            });
        }
        data.extend_from_slice(&chunk[..n]);

        loop {
            match tokio::time::timeout(Self::RAW_IDLE, guard.read(&mut chunk)).await {
                Err(_) | Ok(Ok(0)) => break,
                Ok(Ok(n)) => data.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Ok(Err(e)) => return Err(io_error(command, e)),
            }
        }

        tracing::debug!(command, bytes = data.len(), "scpi raw response");
        Ok(Bytes::from(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_connection(capacity: usize) -> (tokio::io::DuplexStream, ScpiConnection) {
        let (host, device) = tokio::io::duplex(capacity);
        let conn = ScpiConnection::new(wrap_shared(Box::new(device)), Duration::from_millis(500));
        (host, conn)
    }

    #[tokio::test]
    async fn query_sends_command_and_trims_response() {
        let (mut host, conn) = test_connection(256);

        host.write_all(b"Keysight Technologies,P9375A,MY0001,A.01\n")
            .await
            .unwrap();

        let response = conn.query("*IDN?").await.unwrap();
        assert_eq!(response, "Keysight Technologies,P9375A,MY0001,A.01");

        let mut buf = [0u8; 16];
        let n = host.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"*IDN?\n");
    }

    #[tokio::test]
    async fn query_times_out_without_response() {
        let (_host, conn) = test_connection(256);

        let err = conn
            .query_timeout("*OPC?", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ScpiError::Timeout { .. }));
    }

    #[tokio::test]
    async fn query_reports_closed_stream() {
        let (host, conn) = test_connection(256);
        drop(host);

        let err = conn.query("*IDN?").await.unwrap_err();
        // The write may also surface the closed pipe, depending on timing.
        assert!(matches!(
            err,
            ScpiError::Closed { .. } | ScpiError::Io { .. }
        ));
    }

    #[tokio::test]
    async fn query_raw_collects_block_response() {
        let (mut host, conn) = test_connection(256);

        host.write_all(b"#15hello\n").await.unwrap();

        let raw = conn
            .query_raw("MMEM:TRAN? 'x.s1p'", Duration::from_millis(500))
            .await
            .unwrap();
        assert!(raw.starts_with(b"#15hello"));
    }

    #[tokio::test]
    async fn drain_stale_discards_pending_bytes() {
        let (mut host, mut device) = tokio::io::duplex(64);

        host.write_all(b"stale data 12345").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let discarded = drain_stale(&mut device, 50).await;
        assert_eq!(discarded, 16);
    }
}
