//! Error handling for the heating-link polling service.
//!
//! The poll loop sorts failures into two classes: errors that abort only the
//! sampling pass in progress (the session stays up and re-syncs), and errors
//! that are fatal to the session (the link is reopened after a fixed
//! backoff). [`OptoSrvError::is_pass_abort`] draws that line.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for the polling service.
pub type Result<T> = std::result::Result<T, OptoSrvError>;

/// Service error type.
#[derive(Error, Debug)]
pub enum OptoSrvError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The serial link could not be opened or broke down.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No response byte arrived within the read timeout.
    #[error("Read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// The device answered with fewer bytes than the register spans.
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// A frame could not be written within the write timeout.
    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// Transport-level I/O failure.
    #[error("IO error: {0}")]
    Io(String),

    /// Raw response bytes did not match the register specification.
    #[error("Decode error: {0}")]
    Decode(#[from] opto_model::CodecError),

    /// Appending to the data log failed.
    #[error("Log sink error: {0}")]
    LogSink(String),

    /// Dispatching an alarm notification failed.
    #[error("Notification error: {0}")]
    Notify(String),

    /// Cooperative cancellation was observed.
    #[error("Cancelled")]
    Cancelled,
}

impl OptoSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        OptoSrvError::Config(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        OptoSrvError::Connection(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        OptoSrvError::Io(msg.into())
    }

    pub fn log_sink(msg: impl Into<String>) -> Self {
        OptoSrvError::LogSink(msg.into())
    }

    pub fn notify(msg: impl Into<String>) -> Self {
        OptoSrvError::Notify(msg.into())
    }

    /// Whether this error aborts only the in-progress sampling pass.
    ///
    /// Everything else is fatal to the session and sends the poll loop
    /// through its reconnect backoff.
    pub fn is_pass_abort(&self) -> bool {
        matches!(
            self,
            OptoSrvError::ReadTimeout(_) | OptoSrvError::ShortRead { .. }
        )
    }
}

impl From<std::io::Error> for OptoSrvError {
    fn from(err: std::io::Error) -> Self {
        OptoSrvError::Io(err.to_string())
    }
}
