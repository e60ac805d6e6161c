//! # insteon-linkdb - Insteon all-link database synchronization
//!
//! Keeps in-memory mirrors of an Insteon PLM's all-link table and of each remote
//! device's link table in step with the hardware, over the single half-duplex
//! serial channel the PLM provides.
//!
//! ## Features
//!
//! - **Record model**: link and modem records, flags, pending add/modify/delete changes.
//! - **Database models**: per-device [`database::LinkDB`] with completeness tracking and
//!   the modem [`database::ModemDB`] with per-peer group sets and product data.
//! - **Protocol drivers**: standard record reads/writes, peek/poke for I1 devices and the
//!   modem's get-first/get-next enumeration, all run by one watchdog-supervised driver loop.
//! - **Serialized access**: [`database::DatabaseManager`] runs at most one operation at a
//!   time and pauses the other transport consumers meanwhile.
//! - **Cache**: JSON snapshots restored through the same load entry points a download uses.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use insteon_linkdb::database::{DatabaseManager, DatabaseTarget, DatabaseTuning, PauseFlag};
//! use insteon_linkdb::device::{InsteonDevice, InsteonEngine};
//! use insteon_linkdb::insteon::{InsteonAddress, Transport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (transport, _outgoing) = Transport::new();
//!     let manager = DatabaseManager::start(
//!         DatabaseTuning::default(),
//!         transport,
//!         Arc::new(PauseFlag::new()),
//!         Arc::new(PauseFlag::new()),
//!     );
//!     let device = Arc::new(InsteonDevice::new(InsteonAddress::new(0x1A, 0x2B, 0x3C), InsteonEngine::I2CS));
//!     let mut events = device.subscribe();
//!     manager.read(DatabaseTarget::Device(device.clone()), Duration::ZERO);
//!     let _ = events.recv().await;
//!     println!("{:?}", device.link_db().status());
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`insteon`] - addresses, message codec, framer, transport and serial IO
//! - [`device`] - device and modem objects owning the databases
//! - [`database`] - models, manager, driver, read/write strategies and cache
//! - [`config`] - TOML configuration
//! - [`errors`] - library error types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ DatabaseManager │ ← one operation at a time
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Driver loop +  │ ← watchdog, restart/abort, finalize
//! │   strategies    │
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │    Transport    │ ← listener fan-out over the PLM
//! └─────────────────┘
//! ```

pub mod config;
pub mod database;
pub mod device;
pub mod errors;
pub mod insteon;
pub mod logutil;
pub mod metrics;
