//! Byte Transports
//!
//! The adapter is reached through anything that can write bytes and read
//! until a terminator: a USB/Bluetooth serial port, or a TCP bridge as used
//! by WiFi ELM327 dongles.

use crate::error::ObdError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Half-duplex byte link to an adapter
#[async_trait]
pub trait Transport: Send {
    /// Write all bytes
    async fn write(&mut self, bytes: &[u8]) -> Result<(), ObdError>;

    /// Read until `terminator` (inclusive) or fail with [`ObdError::Timeout`]
    async fn read_until(&mut self, terminator: u8, timeout: Duration) -> Result<Vec<u8>, ObdError>;

    /// Release the underlying device
    async fn close(&mut self) -> Result<(), ObdError>;
}

/// Transport over any async byte stream.
///
/// Bytes read past the terminator, or a partial reply cut off by a timeout,
/// stay buffered for the next read.
pub struct StreamTransport<S> {
    stream: Option<S>,
    buffer: Vec<u8>,
    label: String,
}

/// Transport over a local serial device
pub type SerialTransport = StreamTransport<SerialStream>;

/// Transport over a TCP-to-serial bridge
pub type TcpTransport = StreamTransport<TcpStream>;

impl<S> StreamTransport<S> {
    /// Wrap an already opened stream
    pub fn new(stream: S, label: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            buffer: Vec::with_capacity(128),
            label: label.into(),
        }
    }

    /// Device path or address this transport talks to
    pub fn label(&self) -> &str {
        &self.label
    }

    fn take_through(&mut self, end: usize) -> Vec<u8> {
        self.buffer.drain(..=end).collect()
    }
}

impl SerialTransport {
    /// Open a serial device (e.g. `/dev/ttyUSB0` or `COM3`). Needs a tokio runtime.
    pub fn open(device: &str, baud_rate: u32) -> Result<Self, ObdError> {
        let stream = tokio_serial::new(device, baud_rate).open_native_async()?;
        info!("Opened serial port {} at {} baud", device, baud_rate);
        Ok(Self::new(stream, device))
    }
}

impl TcpTransport {
    /// Connect to a TCP bridge such as `192.168.0.10:35000`
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, ObdError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ObdError::Timeout(timeout.as_millis() as u64))??;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY: {}", e);
        }
        info!("Connected to adapter bridge at {}", addr);
        Ok(Self::new(stream, addr))
    }
}

fn closed(label: &str) -> ObdError {
    ObdError::Transport(format!("{label} is closed"))
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, bytes: &[u8]) -> Result<(), ObdError> {
        let stream = self.stream.as_mut().ok_or_else(|| closed(&self.label))?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_until(&mut self, terminator: u8, timeout: Duration) -> Result<Vec<u8>, ObdError> {
        if let Some(end) = self.buffer.iter().position(|&b| b == terminator) {
            return Ok(self.take_through(end));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut chunk = [0u8; 256];
        loop {
            let stream = self.stream.as_mut().ok_or_else(|| closed(&self.label))?;
            let n = match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
                Ok(result) => result?,
                Err(_) => return Err(ObdError::Timeout(timeout.as_millis() as u64)),
            };
            if n == 0 {
                return Err(ObdError::Transport(format!(
                    "{} closed by peer",
                    self.label
                )));
            }

            let start = self.buffer.len();
            self.buffer.extend_from_slice(&chunk[..n]);
            if let Some(offset) = chunk[..n].iter().position(|&b| b == terminator) {
                return Ok(self.take_through(start + offset));
            }
        }
    }

    async fn close(&mut self) -> Result<(), ObdError> {
        self.buffer.clear();
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                warn!("Error shutting down {}: {}", self.label, e);
            }
            info!("Closed {}", self.label);
        }
        Ok(())
    }
}
