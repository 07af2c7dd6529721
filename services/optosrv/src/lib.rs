//! Heating-link polling service.
//!
//! Talks to a heating control unit over a serial opto-isolated link using the
//! vendor's half-duplex byte protocol, samples a configured set of registers
//! on an interval, appends tab-separated time-series rows to log files, and
//! raises/clears alarm mails when thresholds stay crossed across consecutive
//! samples.

pub mod alarm;
pub mod bootstrap;
pub mod error;
pub mod link;
pub mod notify;
pub mod online;
pub mod poll;
pub mod sink;
pub mod web;

pub use error::{OptoSrvError, Result};
