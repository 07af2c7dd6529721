//! Half-duplex protocol session.
//!
//! The heating unit owns the link: it grants a request window by emitting a
//! sync byte, the host acknowledges, and may then issue a bounded number of
//! register requests (bounded in count and in elapsed time) before it has to
//! wait for the next grant. The session tracks that window and re-syncs
//! transparently, so a sampling pass never sees the handshake churn.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use opto_model::WindowLimits;

use super::transport::{LinkTransport, READ_TIMEOUT};
use crate::error::{OptoSrvError, Result};

/// Sync byte the device emits to grant a request window.
pub const SYNC_BYTE: u8 = 0x05;

/// Acknowledgement the host answers a sync byte with.
pub const ACK_BYTE: u8 = 0x01;

/// Opcode of the 4-byte register request frame.
pub const REQUEST_OPCODE: u8 = 0xF7;

/// Cadence of the sync-byte wait. The wait itself is unbounded; only
/// cancellation or a transport failure ends it.
const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Hard elapsed-time ceiling of one request window. The device stops
/// answering after roughly this long no matter what the configuration says.
const WINDOW_CEILING: Duration = Duration::from_millis(750);

/// One protocol session on an open transport.
pub struct LinkSession<T: LinkTransport> {
    transport: T,
    limits: WindowLimits,
    cancel: CancellationToken,
    window_requests: u32,
    window_started: Instant,
    handshakes: u64,
}

impl<T: LinkTransport> LinkSession<T> {
    pub fn new(transport: T, limits: WindowLimits, cancel: CancellationToken) -> Self {
        Self {
            transport,
            limits,
            cancel,
            window_requests: 0,
            window_started: Instant::now(),
            handshakes: 0,
        }
    }

    /// Total sync handshakes performed on this session.
    pub fn handshakes(&self) -> u64 {
        self.handshakes
    }

    /// Drain whatever the device pushed since the last pass, so the next
    /// handshake starts from a clean buffer.
    pub async fn discard_pending(&mut self) -> Result<()> {
        let mut scratch = [0u8; 100];
        match self.transport.receive(&mut scratch, READ_TIMEOUT).await {
            Ok(n) => {
                debug!(bytes = n, "discarded buffered input");
                Ok(())
            }
            Err(OptoSrvError::ReadTimeout(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Block until the device grants a request window, then acknowledge it.
    ///
    /// Reads one byte at a time on a one-second cadence. There is no
    /// timeout: the wait runs until the sync byte arrives, the token is
    /// cancelled, or the transport itself fails.
    pub async fn sync_and_ack(&mut self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(OptoSrvError::Cancelled);
            }

            let mut byte = [0u8; 1];
            match self.transport.receive(&mut byte, READ_TIMEOUT).await {
                Ok(_) if byte[0] == SYNC_BYTE => {
                    self.transport.send(&[ACK_BYTE]).await?;
                    self.window_requests = 0;
                    self.window_started = Instant::now();
                    self.handshakes += 1;
                    trace!("sync byte acknowledged");
                    return Ok(());
                }
                // A stray byte and an empty line are the same here: not a
                // grant. Keep to the one-second cadence either way.
                Ok(_) | Err(OptoSrvError::ReadTimeout(_)) => {}
                Err(e) => return Err(e),
            }

            tokio::select! {
                () = self.cancel.cancelled() => return Err(OptoSrvError::Cancelled),
                () = sleep(SYNC_POLL_INTERVAL) => {}
            }
        }
    }

    /// Request one register and read its full response.
    ///
    /// Re-syncs first when the current window is spent, so the caller's
    /// sampling pass continues uninterrupted across handshakes.
    pub async fn request_register(&mut self, address: u16, length: usize) -> Result<Vec<u8>> {
        if self.window_spent() {
            debug!(
                requests = self.window_requests,
                "request window spent, waiting for next sync byte"
            );
            self.sync_and_ack().await?;
        }

        let frame = [
            REQUEST_OPCODE,
            (address >> 8) as u8,
            (address & 0xFF) as u8,
            length as u8,
        ];
        self.transport.send(&frame).await?;
        self.window_requests += 1;

        let mut data = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            match self.transport.receive(&mut data[filled..], READ_TIMEOUT).await {
                Ok(n) => filled += n,
                Err(OptoSrvError::ReadTimeout(wait)) => {
                    if filled == 0 {
                        return Err(OptoSrvError::ReadTimeout(wait));
                    }
                    return Err(OptoSrvError::ShortRead {
                        expected: length,
                        actual: filled,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        trace!(
            address = format_args!("0x{address:04X}"),
            response = ?data,
            "register response"
        );
        Ok(data)
    }

    fn window_spent(&self) -> bool {
        self.window_requests >= self.limits.max_requests_per_handshake
            || self.window_started.elapsed() > self.window_ceiling()
    }

    fn window_ceiling(&self) -> Duration {
        WINDOW_CEILING.min(Duration::from_millis(self.limits.max_window_millis))
    }
}
