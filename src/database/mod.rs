//! # All-link database synchronization
//!
//! - [`record`] - record values and pending changes
//! - [`link_db`] / [`modem_db`] - in-memory models owned by devices and the modem
//! - [`manager`] - serializes every read and write over the shared transport
//! - [`driver`] - the generic watchdog/listener loop operations run under
//! - [`reader`] / [`writer`] - protocol strategies for each database kind
//! - [`cache`] - JSON snapshots of both models

use std::time::Duration;

pub mod cache;
pub mod driver;
pub mod link_db;
pub mod manager;
pub mod modem_db;
pub mod reader;
pub mod record;
pub mod writer;

pub use cache::DatabaseCache;
pub use link_db::{DatabaseStatus, LinkDB};
pub use manager::{DatabaseManager, DatabaseTarget, OperationKind, Pausable, PauseFlag};
pub use modem_db::{ModemDB, ModemDBEntry};
pub use record::{ChangeType, DatabaseChange, LinkDBChange, LinkDBRecord, ModemDBChange, ModemDBRecord, Record, RecordType};

/// Timeouts for each operation kind plus the watchdog period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseTuning {
    pub link_read_timeout: Duration,
    pub link_write_timeout: Duration,
    pub modem_read_timeout: Duration,
    pub modem_write_timeout: Duration,
    pub watchdog_interval: Duration,
}

impl Default for DatabaseTuning {
    fn default() -> Self {
        Self {
            link_read_timeout: Duration::from_millis(6000),
            link_write_timeout: Duration::from_millis(6000),
            modem_read_timeout: Duration::from_millis(30000),
            modem_write_timeout: Duration::from_millis(2000),
            watchdog_interval: Duration::from_millis(1000),
        }
    }
}
