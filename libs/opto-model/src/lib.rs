//! Data model for the heating-link polling service.
//!
//! This crate holds everything the daemon needs to know about the device it
//! polls but that involves no I/O of its own: register specifications, the
//! raw-bytes-to-engineering-value codec, and the configuration types with
//! their loader.

pub mod codec;
pub mod config;
pub mod register;

pub use codec::{decode, CodecError};
pub use config::{
    AppConfig, ConfigError, DeviceConfig, OnlineCheckEntry, SmtpConfig, WebConfig, WindowLimits,
};
pub use register::{RegisterSpec, ValueFormat};
