//! Device and modem objects that own the database models.
//!
//! Drivers hold an `Arc` to one of these for the duration of an operation and
//! call the completion hooks after finalizing. Hooks publish [`DatabaseEvent`]s on
//! a broadcast channel so higher layers can react without polling.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::database::link_db::{DatabaseStatus, LinkDB};
use crate::database::modem_db::ModemDB;
use crate::insteon::address::InsteonAddress;

const EVENT_CAPACITY: usize = 64;

/// Protocol generation a device speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InsteonEngine {
    I1,
    I2,
    I2CS,
    #[default]
    Unknown,
}

impl InsteonEngine {
    /// Extended messages from this engine carry a valid checksum.
    pub fn supports_checksum(self) -> bool {
        matches!(self, InsteonEngine::I2CS)
    }

    /// Link table access is only possible through byte peek/poke.
    pub fn uses_peek_poke(self) -> bool {
        matches!(self, InsteonEngine::I1)
    }
}

impl fmt::Display for InsteonEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InsteonEngine::I1 => "I1",
            InsteonEngine::I2 => "I2",
            InsteonEngine::I2CS => "I2CS",
            InsteonEngine::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

impl FromStr for InsteonEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "i1" => Ok(InsteonEngine::I1),
            "i2" => Ok(InsteonEngine::I2),
            "i2cs" => Ok(InsteonEngine::I2CS),
            "unknown" => Ok(InsteonEngine::Unknown),
            other => Err(format!("unknown insteon engine '{}'", other)),
        }
    }
}

/// Category, subcategory and firmware a device reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductData {
    device_category: u8,
    sub_category: u8,
    firmware: u8,
}

impl ProductData {
    pub fn new(device_category: u8, sub_category: u8, firmware: u8) -> Self {
        Self {
            device_category,
            sub_category,
            firmware,
        }
    }

    /// Product data carried in the data bytes of a modem record, if any was set.
    pub fn from_link_data(data: [u8; 3]) -> Option<Self> {
        if data[0] == 0 && data[1] == 0 {
            None
        } else {
            Some(Self::new(data[0], data[1], data[2]))
        }
    }

    pub fn device_category(&self) -> u8 {
        self.device_category
    }

    pub fn sub_category(&self) -> u8 {
        self.sub_category
    }

    pub fn firmware(&self) -> u8 {
        self.firmware
    }
}

impl fmt::Display for ProductData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "devCat:{:02X} subCat:{:02X} firmware:{:02X}",
            self.device_category, self.sub_category, self.firmware
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseEvent {
    LinkDbUpdated {
        address: InsteonAddress,
        status: DatabaseStatus,
    },
    ModemDbCompleted {
        records: usize,
    },
    ModemDbUpdated,
    ModemLinkUpdated {
        address: InsteonAddress,
        group: u8,
        is_controller: bool,
    },
}

/// Remote device with its own link table.
pub struct InsteonDevice {
    address: InsteonAddress,
    engine: Mutex<InsteonEngine>,
    link_db: Mutex<LinkDB>,
    events: broadcast::Sender<DatabaseEvent>,
}

impl InsteonDevice {
    pub fn new(address: InsteonAddress, engine: InsteonEngine) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            address,
            engine: Mutex::new(engine),
            link_db: Mutex::new(LinkDB::new()),
            events,
        }
    }

    pub fn address(&self) -> InsteonAddress {
        self.address
    }

    pub fn engine(&self) -> InsteonEngine {
        *self.engine.lock().expect("device engine mutex poisoned")
    }

    pub fn set_engine(&self, engine: InsteonEngine) {
        *self.engine.lock().expect("device engine mutex poisoned") = engine;
    }

    pub fn link_db(&self) -> MutexGuard<'_, LinkDB> {
        self.link_db.lock().expect("link db mutex poisoned")
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DatabaseEvent> {
        self.events.subscribe()
    }

    /// Called by drivers once a read or write has been finalized.
    pub fn link_db_updated(&self) {
        let (status, count) = {
            let db = self.link_db();
            (db.status(), db.record_count())
        };
        info!("{}: link db {:?} with {} records", self.address, status, count);
        // no subscribers is fine
        let _ = self.events.send(DatabaseEvent::LinkDbUpdated {
            address: self.address,
            status,
        });
    }
}

impl fmt::Debug for InsteonDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsteonDevice")
            .field("address", &self.address)
            .field("engine", &self.engine())
            .finish()
    }
}

/// The local PLM and its all-link table.
pub struct InsteonModem {
    address: InsteonAddress,
    db: Mutex<ModemDB>,
    events: broadcast::Sender<DatabaseEvent>,
}

impl InsteonModem {
    pub fn new(address: InsteonAddress) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            address,
            db: Mutex::new(ModemDB::new()),
            events,
        }
    }

    pub fn address(&self) -> InsteonAddress {
        self.address
    }

    pub fn db(&self) -> MutexGuard<'_, ModemDB> {
        self.db.lock().expect("modem db mutex poisoned")
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DatabaseEvent> {
        self.events.subscribe()
    }

    pub fn database_completed(&self) {
        let records = self.db().record_count();
        info!("modem database completed with {} records", records);
        let _ = self.events.send(DatabaseEvent::ModemDbCompleted { records });
    }

    pub fn database_updated(&self) {
        debug!("modem database updated");
        let _ = self.events.send(DatabaseEvent::ModemDbUpdated);
    }

    pub fn database_link_updated(&self, address: InsteonAddress, group: u8, is_controller: bool) {
        debug!(
            "modem link updated: {} group {} {}",
            address,
            group,
            if is_controller { "controller" } else { "responder" }
        );
        let _ = self.events.send(DatabaseEvent::ModemLinkUpdated {
            address,
            group,
            is_controller,
        });
    }
}

impl fmt::Debug for InsteonModem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsteonModem")
            .field("address", &self.address)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_capabilities() {
        assert!(InsteonEngine::I2CS.supports_checksum());
        assert!(!InsteonEngine::I2.supports_checksum());
        assert!(InsteonEngine::I1.uses_peek_poke());
        assert_eq!("i2cs".parse::<InsteonEngine>().unwrap(), InsteonEngine::I2CS);
        assert!("i3".parse::<InsteonEngine>().is_err());
    }

    #[test]
    fn product_data_from_link_data() {
        assert!(ProductData::from_link_data([0, 0, 0x41]).is_none());
        let pd = ProductData::from_link_data([0x02, 0x2A, 0x43]).unwrap();
        assert_eq!(pd.sub_category(), 0x2A);
    }

    #[tokio::test]
    async fn hooks_publish_events() {
        let device = InsteonDevice::new(InsteonAddress::new(1, 2, 3), InsteonEngine::I2);
        let mut rx = device.subscribe();
        device.link_db_updated();
        assert_eq!(
            rx.recv().await.unwrap(),
            DatabaseEvent::LinkDbUpdated {
                address: InsteonAddress::new(1, 2, 3),
                status: DatabaseStatus::Empty,
            }
        );
    }
}
