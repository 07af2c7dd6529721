//! In-memory heating unit for the test suite.
//!
//! Implements [`LinkTransport`] without any I/O: it offers request windows
//! whenever the line is idle, answers acknowledged request frames from a
//! register table, and optionally goes silent after a fixed number of
//! requests per grant, the way the real unit does when a host overstays its
//! window. Response latency is simulated with tokio timers so timing
//! behavior can be tested under a paused clock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::session::{ACK_BYTE, REQUEST_OPCODE, SYNC_BYTE};
use super::transport::LinkTransport;
use crate::error::{OptoSrvError, Result};

struct SimState {
    registers: Mutex<HashMap<u16, Vec<u8>>>,
    pending: Mutex<VecDeque<u8>>,
    latency: Mutex<Duration>,
    /// Whether the unit is currently offering a sync byte.
    offering: AtomicBool,
    /// Cleared by [`SimulatedUnit::withhold_sync`]; the unit then never
    /// grants a window.
    sync_enabled: AtomicBool,
    /// Requests the unit answers per grant before going silent. `None`
    /// answers everything.
    answer_limit: Option<u32>,
    handshakes: AtomicU32,
    requests: AtomicU32,
    requests_since_ack: AtomicU32,
    max_burst: AtomicU32,
}

/// Cloneable handle to one simulated unit; clones share all state, so a
/// clone handed to the session stays observable from the test.
#[derive(Clone)]
pub struct SimulatedUnit {
    state: Arc<SimState>,
}

impl SimulatedUnit {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A unit that answers at most `limit` requests per grant and then goes
    /// silent until the next handshake.
    pub fn with_answer_limit(limit: u32) -> Self {
        Self::build(Some(limit))
    }

    fn build(answer_limit: Option<u32>) -> Self {
        Self {
            state: Arc::new(SimState {
                registers: Mutex::new(HashMap::new()),
                pending: Mutex::new(VecDeque::new()),
                latency: Mutex::new(Duration::ZERO),
                offering: AtomicBool::new(true),
                sync_enabled: AtomicBool::new(true),
                answer_limit,
                handshakes: AtomicU32::new(0),
                requests: AtomicU32::new(0),
                requests_since_ack: AtomicU32::new(0),
                max_burst: AtomicU32::new(0),
            }),
        }
    }

    /// Set the raw response bytes for a register. A response shorter than
    /// the requested length produces a short read on the host side.
    pub fn set_register(&self, address: u16, bytes: &[u8]) {
        self.state
            .registers
            .lock()
            .unwrap()
            .insert(address, bytes.to_vec());
    }

    /// Simulated response latency per read.
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock().unwrap() = latency;
    }

    /// Stop offering sync bytes; the host's sync wait then never returns.
    pub fn withhold_sync(&self) {
        self.state.sync_enabled.store(false, Ordering::SeqCst);
    }

    /// Queue stale bytes as if a previous pass had been aborted mid-read.
    pub fn push_stale(&self, bytes: &[u8]) {
        self.state
            .pending
            .lock()
            .unwrap()
            .extend(bytes.iter().copied());
    }

    /// Sync handshakes the host completed (acknowledgements received).
    pub fn handshakes(&self) -> u32 {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    /// Total register requests received.
    pub fn requests(&self) -> u32 {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Largest number of requests the host issued within one grant.
    pub fn max_requests_per_window(&self) -> u32 {
        self.state.max_burst.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedUnit {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkTransport for SimulatedUnit {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if data.len() == 1 && data[0] == ACK_BYTE {
            self.state.offering.store(false, Ordering::SeqCst);
            self.state.requests_since_ack.store(0, Ordering::SeqCst);
            self.state.handshakes.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        if data.len() == 4 && data[0] == REQUEST_OPCODE {
            let address = u16::from(data[1]) << 8 | u16::from(data[2]);
            self.state.requests.fetch_add(1, Ordering::SeqCst);
            let burst = self.state.requests_since_ack.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.max_burst.fetch_max(burst, Ordering::SeqCst);

            if self.state.answer_limit.is_some_and(|limit| burst > limit) {
                // Window overstayed: the unit goes silent.
                return Ok(());
            }

            if let Some(bytes) = self.state.registers.lock().unwrap().get(&address) {
                self.state
                    .pending
                    .lock()
                    .unwrap()
                    .extend(bytes.iter().copied());
            }
        }

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize> {
        let latency = *self.state.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        {
            let mut pending = self.state.pending.lock().unwrap();
            if !pending.is_empty() {
                let n = buf.len().min(pending.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = pending.pop_front().expect("pending is non-empty");
                }
                return Ok(n);
            }
        }

        if !self.state.sync_enabled.load(Ordering::SeqCst) {
            return Err(OptoSrvError::ReadTimeout(wait));
        }

        if self.state.offering.load(Ordering::SeqCst) {
            buf[0] = SYNC_BYTE;
            return Ok(1);
        }

        // Idle line: the unit starts offering windows again, but this read
        // comes up empty first, like the gap on the real link.
        self.state.offering.store(true, Ordering::SeqCst);
        Err(OptoSrvError::ReadTimeout(wait))
    }
}
