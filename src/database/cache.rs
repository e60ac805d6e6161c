//! JSON snapshot of the modem table and every known device link table.
//!
//! Restoring goes through the same `load_records` / `load_products` /
//! [`LinkDB::load`] entry points a download uses, so status is recomputed
//! rather than trusted from the file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::link_db::LinkDB;
use crate::database::modem_db::ModemDB;
use crate::database::record::{LinkDBRecord, ModemDBRecord};
use crate::device::ProductData;
use crate::insteon::address::InsteonAddress;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedLinkDb {
    pub first_location: u16,
    pub delta: Option<u8>,
    pub records: Vec<LinkDBRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseCache {
    pub modem_complete: bool,
    pub modem_records: Vec<ModemDBRecord>,
    pub products: BTreeMap<InsteonAddress, ProductData>,
    pub devices: BTreeMap<InsteonAddress, CachedLinkDb>,
    pub last_updated: DateTime<Utc>,
}

impl DatabaseCache {
    pub fn new() -> Self {
        Self {
            modem_complete: false,
            modem_records: Vec::new(),
            products: BTreeMap::new(),
            devices: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn capture_modem(&mut self, db: &ModemDB) {
        self.modem_complete = db.is_complete();
        self.modem_records = db.records();
        self.products = db
            .entries()
            .into_iter()
            .filter_map(|e| e.product_data().map(|pd| (e.address(), pd)))
            .collect();
        self.last_updated = Utc::now();
    }

    pub fn capture_device(&mut self, address: InsteonAddress, db: &LinkDB) {
        self.devices.insert(
            address,
            CachedLinkDb {
                first_location: db.first_record_location(),
                delta: db.database_delta(),
                records: db.records(),
            },
        );
        self.last_updated = Utc::now();
    }

    pub fn restore_modem(&self, db: &mut ModemDB) {
        db.load_records(self.modem_records.iter().copied());
        db.load_products(self.products.iter().map(|(a, pd)| (*a, *pd)));
        db.set_complete(self.modem_complete);
    }

    /// Returns false when nothing is cached for `address`.
    pub fn restore_device(&self, address: InsteonAddress, db: &mut LinkDB) -> bool {
        let Some(cached) = self.devices.get(&address) else {
            return false;
        };
        db.set_first_record_location(cached.first_location);
        if let Some(delta) = cached.delta {
            db.update_database_delta(delta);
        }
        db.load(cached.records.iter().copied());
        true
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading cache {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing cache {}", path.display()))
    }

    /// Write to `<file>.tmp` next to the target, then rename it into place.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let content = serde_json::to_vec_pretty(self)?;
        let mut file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(&content)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

impl Default for DatabaseCache {
    fn default() -> Self {
        Self::new()
    }
}
