//! Serial link to the heating unit.
//!
//! [`transport`] abstracts the byte pipe (production: tokio-serial),
//! [`session`] speaks the half-duplex protocol on top of it, and
//! [`simulator`] is an in-memory unit used by the test suite.

pub mod session;
pub mod simulator;
pub mod transport;

pub use session::LinkSession;
pub use transport::{LinkTransport, SerialLink};
