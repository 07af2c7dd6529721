//! Byte transport abstraction and the serial implementation.
//!
//! The session is written against [`LinkTransport`] so the protocol engine
//! can be exercised with a scripted in-memory unit; [`SerialLink`] is the
//! production implementation over tokio-serial with the port parameters the
//! opto-link protocol fixes: 4800 baud, even parity, 8 data bits, 2 stop
//! bits.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, trace};

use crate::error::{OptoSrvError, Result};

/// Baud rate fixed by the opto-link protocol.
pub const BAUD_RATE: u32 = 4800;

/// Read timeout during steady polling.
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Write timeout for command frames.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// One byte pipe to the device.
#[async_trait]
pub trait LinkTransport: Send {
    /// Write all of `data`, bounded by the write timeout.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes. Returns the count read (at least one),
    /// or [`OptoSrvError::ReadTimeout`] when nothing arrived within `wait`.
    async fn receive(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize>;
}

/// Serial port transport.
pub struct SerialLink {
    port: SerialStream,
    device: String,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("device", &self.device)
            .finish()
    }
}

impl SerialLink {
    /// Open the serial device with the protocol's fixed port parameters.
    pub fn open(device: &str) -> Result<Self> {
        let mut port = tokio_serial::new(device, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::Even)
            .stop_bits(StopBits::Two)
            .timeout(READ_TIMEOUT)
            .open_native_async()
            .map_err(|e| {
                OptoSrvError::connection(format!("failed to open serial port {device}: {e}"))
            })?;

        #[cfg(unix)]
        port.set_exclusive(false)
            .map_err(|e| OptoSrvError::connection(format!("failed to set exclusive mode: {e}")))?;

        debug!(device, baud = BAUD_RATE, "serial port opened");
        Ok(Self {
            port,
            device: device.to_string(),
        })
    }

    /// The device path this link was opened on.
    pub fn device(&self) -> &str {
        &self.device
    }
}

#[async_trait]
impl LinkTransport for SerialLink {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let write = async {
            self.port.write_all(data).await?;
            self.port.flush().await?;
            Ok::<_, std::io::Error>(())
        };

        match timeout(WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => {
                trace!(hex = %hex_dump(data), direction = "send", "raw bytes");
                Ok(())
            }
            Ok(Err(e)) => Err(OptoSrvError::io(format!("serial write failed: {e}"))),
            Err(_) => Err(OptoSrvError::WriteTimeout(WRITE_TIMEOUT)),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize> {
        match timeout(wait, self.port.read(buf)).await {
            Ok(Ok(0)) => Err(OptoSrvError::io("serial link closed")),
            Ok(Ok(n)) => {
                trace!(hex = %hex_dump(&buf[..n]), direction = "recv", "raw bytes");
                Ok(n)
            }
            Ok(Err(e)) => Err(OptoSrvError::io(format!("serial read failed: {e}"))),
            Err(_) => Err(OptoSrvError::ReadTimeout(wait)),
        }
    }
}

fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
