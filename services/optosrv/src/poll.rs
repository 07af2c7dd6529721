//! The sampling loop.
//!
//! Drives one device: opens the link, syncs, walks the register list in
//! configuration order, and hands every completed sample to the alarm
//! monitor and the log sink. Pass-level failures (a short or missing
//! response, a blown time budget) discard the sample and re-enter the sync
//! state on the same link; everything else closes the session and reopens it
//! after a fixed backoff. Cancellation is cooperative: checked at the loop
//! head and before every wait, never by interrupting I/O in flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use opto_model::{codec, DeviceConfig, RegisterSpec};

use crate::alarm::AlarmMonitor;
use crate::error::{OptoSrvError, Result};
use crate::link::session::LinkSession;
use crate::link::transport::LinkTransport;
use crate::sink::LogSink;

/// Fixed delay before reopening the link after a fatal session failure.
/// Deliberately not exponential: an established link stays up for months,
/// so there is nothing to adapt to.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// Cumulative time budget of one sampling pass. A pass that runs past this
/// is discarded whole; its readings span too much time to be one sample.
pub const PASS_BUDGET: Duration = Duration::from_secs(10);

/// Pacing remainders below this guard wait a full interval instead of
/// firing the next pass almost immediately.
pub const PACING_GUARD: Duration = Duration::from_millis(500);

/// One completed sampling pass. Published atomically: either every register
/// decoded, or nothing leaves the pass.
#[derive(Debug, Clone)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    pub values: Vec<String>,
}

/// The per-device polling loop. One instance owns one link exclusively.
pub struct PollLoop {
    config: Arc<DeviceConfig>,
    sink: Arc<dyn LogSink>,
    alarms: AlarmMonitor,
    cancel: CancellationToken,
}

impl PollLoop {
    pub fn new(
        config: Arc<DeviceConfig>,
        sink: Arc<dyn LogSink>,
        alarms: AlarmMonitor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            sink,
            alarms,
            cancel,
        }
    }

    /// Run until cancelled. `open_link` is called for the initial connection
    /// and after every fatal session failure.
    pub async fn run<T, F>(mut self, mut open_link: F)
    where
        T: LinkTransport,
        F: FnMut() -> Result<T>,
    {
        info!(device = %self.config.device, "poll loop starting");

        while !self.cancel.is_cancelled() {
            let transport = match open_link() {
                Ok(transport) => transport,
                Err(e) => {
                    warn!(device = %self.config.device, "failed to open link: {e}");
                    if !self.backoff().await {
                        break;
                    }
                    continue;
                }
            };
            info!(device = %self.config.device, "link opened");

            let mut session =
                LinkSession::new(transport, self.config.window, self.cancel.clone());
            if let Err(e) = self.drive_session(&mut session).await {
                if matches!(e, OptoSrvError::Cancelled) {
                    break;
                }
                error!(device = %self.config.device, "session failed: {e}");
                if !self.backoff().await {
                    break;
                }
            }
        }

        info!(device = %self.config.device, "poll loop stopped");
    }

    /// Sampling loop on one open session. Returns only with an error: fatal
    /// session failures bubble up, cancellation surfaces as `Cancelled`.
    async fn drive_session<T: LinkTransport>(
        &mut self,
        session: &mut LinkSession<T>,
    ) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(OptoSrvError::Cancelled);
            }

            let pass_started = Instant::now();
            match self.run_pass(session).await {
                Ok(Some(sample)) => {
                    self.alarms.evaluate(&self.config.registers, &sample.values);
                    if let Err(e) = self.log_sample(&sample).await {
                        warn!("failed to append sample row: {e}");
                    }
                    self.pace(pass_started.elapsed()).await?;
                }
                Ok(None) => {
                    // Budget blown: the sample is gone, straight back to
                    // syncing without pacing.
                    continue;
                }
                Err(e) if e.is_pass_abort() => {
                    warn!("sampling pass aborted: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One sampling pass: sync, then every register in order.
    ///
    /// Returns `Ok(None)` when the pass exceeded its time budget and was
    /// discarded.
    async fn run_pass<T: LinkTransport>(
        &self,
        session: &mut LinkSession<T>,
    ) -> Result<Option<Sample>> {
        session.discard_pending().await?;
        session.sync_and_ack().await?;

        let started = Instant::now();
        let timestamp = Local::now();
        let mut values = Vec::with_capacity(self.config.registers.len());
        for spec in &self.config.registers {
            let bytes = session
                .request_register(spec.address, spec.byte_length)
                .await?;
            values.push(codec::decode(&bytes, spec)?);

            if started.elapsed() > PASS_BUDGET {
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "pass exceeded time budget, discarding sample"
                );
                return Ok(None);
            }
        }

        Ok(Some(Sample { timestamp, values }))
    }

    async fn log_sample(&self, sample: &Sample) -> Result<()> {
        let folder = sample.timestamp.format(&self.config.log_folder).to_string();
        let file = sample
            .timestamp
            .format(&self.config.log_file_pattern)
            .to_string();

        if !self.sink.exists(&folder, &file).await {
            self.sink
                .append(&folder, &file, &header_row(&self.config.registers))
                .await?;
        }
        self.sink.append(&folder, &file, &data_row(sample)).await
    }

    /// Wait out the rest of the poll interval.
    async fn pace(&self, elapsed: Duration) -> Result<()> {
        let interval = Duration::from_secs(self.config.interval_secs);
        let wait = pacing_wait(interval, elapsed);
        debug!(wait_ms = wait.as_millis() as u64, "pass complete, pacing next pass");

        tokio::select! {
            () = self.cancel.cancelled() => Err(OptoSrvError::Cancelled),
            () = sleep(wait) => Ok(()),
        }
    }

    /// Fixed reconnect delay; false when cancelled while waiting.
    async fn backoff(&self) -> bool {
        debug!(
            seconds = RECONNECT_BACKOFF.as_secs(),
            "backing off before reconnect"
        );
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = sleep(RECONNECT_BACKOFF) => true,
        }
    }
}

/// Remaining wait after a pass took `elapsed` of the interval. A remainder
/// under the guard means the pass ate the whole interval; waiting a full
/// interval then beats firing again immediately.
fn pacing_wait(interval: Duration, elapsed: Duration) -> Duration {
    match interval.checked_sub(elapsed) {
        Some(rest) if rest >= PACING_GUARD => rest,
        _ => interval,
    }
}

/// Tab-separated header: `DateTime` then one column per register.
fn header_row(registers: &[RegisterSpec]) -> String {
    let mut row = String::from("DateTime");
    for spec in registers {
        row.push('\t');
        row.push_str(&spec.column_label());
    }
    row.push('\n');
    row
}

/// Tab-separated data row, led by the pass wall-clock time.
fn data_row(sample: &Sample) -> String {
    let mut row = sample.timestamp.format("%H:%M:%S").to_string();
    for value in &sample.values {
        row.push('\t');
        row.push_str(value);
    }
    row.push('\n');
    row
}
