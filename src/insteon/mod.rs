//! # Insteon PLM Communication Module
//!
//! Low-level plumbing shared by every database operation:
//!
//! - [`address`] - three byte device addresses
//! - [`msg`] - PLM frame codec with named fields and checksum helpers
//! - [`framer`] - incremental inbound stream framer
//! - [`transport`] - listener fan-out over the single half-duplex channel
//! - [`serial`] - serial port tasks (with the `serial` feature)
//!
//! ## Configuration
//!
//! ```toml
//! [transport]
//! port = "/dev/ttyUSB0"
//! baud_rate = 19200
//! ```

pub mod address;
pub mod framer;
pub mod msg;
#[cfg(feature = "serial")]
pub mod serial;
pub mod transport;

pub use address::InsteonAddress;
pub use msg::Msg;
pub use transport::{Transport, TransportEvent, TransportListener};
