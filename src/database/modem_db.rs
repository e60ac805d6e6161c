//! In-memory mirror of the modem all-link table.
//!
//! Records are kept in the order they were downloaded. Each peer address also has
//! an entry holding product data and the controller/responder group sets derived
//! from its records, so callers can answer "is this device linked" without
//! scanning the whole table.

use std::collections::{BTreeSet, HashMap};

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::database::record::{ModemDBChange, ModemDBRecord, Record};
use crate::device::ProductData;
use crate::insteon::address::InsteonAddress;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModemDBEntry {
    address: InsteonAddress,
    product_data: Option<ProductData>,
    controller_groups: BTreeSet<u8>,
    responder_groups: BTreeSet<u8>,
}

impl ModemDBEntry {
    fn new(address: InsteonAddress) -> Self {
        Self {
            address,
            product_data: None,
            controller_groups: BTreeSet::new(),
            responder_groups: BTreeSet::new(),
        }
    }

    pub fn address(&self) -> InsteonAddress {
        self.address
    }

    pub fn product_data(&self) -> Option<ProductData> {
        self.product_data
    }

    /// Groups the modem controls this device with.
    pub fn controller_groups(&self) -> &BTreeSet<u8> {
        &self.controller_groups
    }

    /// Groups of this device the modem responds to.
    pub fn responder_groups(&self) -> &BTreeSet<u8> {
        &self.responder_groups
    }

    fn groups_mut(&mut self, is_controller: bool) -> &mut BTreeSet<u8> {
        if is_controller {
            &mut self.controller_groups
        } else {
            &mut self.responder_groups
        }
    }
}

fn same_link(a: &ModemDBRecord, address: InsteonAddress, group: u8, is_controller: bool) -> bool {
    a.address() == address && a.group() == group && a.is_controller() == is_controller
}

#[derive(Debug, Clone, Default)]
pub struct ModemDB {
    entries: HashMap<InsteonAddress, ModemDBEntry>,
    records: Vec<ModemDBRecord>,
    changes: Vec<ModemDBChange>,
    complete: bool,
}

impl ModemDB {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every record and entry ahead of a full download.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.records.clear();
        self.complete = false;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn set_complete(&mut self, complete: bool) {
        self.complete = complete;
    }

    pub fn entries(&self) -> Vec<ModemDBEntry> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.address);
        entries
    }

    pub fn entry(&self, address: InsteonAddress) -> Option<ModemDBEntry> {
        self.entries.get(&address).cloned()
    }

    pub fn has_entry(&self, address: InsteonAddress) -> bool {
        self.entries.contains_key(&address)
    }

    pub fn records(&self) -> Vec<ModemDBRecord> {
        self.records.clone()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn records_for(&self, address: InsteonAddress) -> Vec<ModemDBRecord> {
        self.records
            .iter()
            .filter(|r| r.address() == address)
            .copied()
            .collect()
    }

    pub fn record(&self, address: InsteonAddress, group: u8, is_controller: bool) -> Option<ModemDBRecord> {
        self.records
            .iter()
            .find(|r| same_link(r, address, group, is_controller))
            .copied()
    }

    pub fn controller_groups(&self, address: InsteonAddress) -> BTreeSet<u8> {
        self.entries
            .get(&address)
            .map(|e| e.controller_groups.clone())
            .unwrap_or_default()
    }

    pub fn responder_groups(&self, address: InsteonAddress) -> BTreeSet<u8> {
        self.entries
            .get(&address)
            .map(|e| e.responder_groups.clone())
            .unwrap_or_default()
    }

    /// Devices that respond when the modem broadcasts on `group`.
    pub fn related_devices(&self, group: u8) -> Vec<InsteonAddress> {
        let mut devices: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.controller_groups.contains(&group))
            .map(|e| e.address)
            .collect();
        devices.sort();
        devices
    }

    /// Groups the modem controls, excluding the group 0 default link.
    pub fn broadcast_groups(&self) -> BTreeSet<u8> {
        self.records
            .iter()
            .filter(|r| r.is_controller() && r.group() != 0)
            .map(|r| r.group())
            .collect()
    }

    fn index_record(&mut self, record: &ModemDBRecord) {
        let entry = self
            .entries
            .entry(record.address())
            .or_insert_with(|| ModemDBEntry::new(record.address()));
        entry.groups_mut(record.is_controller()).insert(record.group());
        if entry.product_data.is_none() {
            if let Some(pd) = ProductData::from_link_data(record.data()) {
                entry.product_data = Some(pd);
            }
        }
    }

    /// Append a downloaded record.
    pub fn add_record(&mut self, record: ModemDBRecord) {
        trace!("adding modem record {}", record);
        self.index_record(&record);
        self.records.push(record);
    }

    /// Replace the table with cached records.
    pub fn load_records(&mut self, records: impl IntoIterator<Item = ModemDBRecord>) {
        self.entries.clear();
        self.records.clear();
        for record in records {
            self.add_record(record);
        }
    }

    /// Attach cached product data to entries.
    pub fn load_products(&mut self, products: impl IntoIterator<Item = (InsteonAddress, ProductData)>) {
        for (address, pd) in products {
            self.entries
                .entry(address)
                .or_insert_with(|| ModemDBEntry::new(address))
                .product_data = Some(pd);
        }
    }

    /// Overwrite the record for the same link in place, or append it.
    pub fn modify_or_add_record(&mut self, record: ModemDBRecord) {
        match self
            .records
            .iter_mut()
            .find(|r| same_link(r, record.address(), record.group(), record.is_controller()))
        {
            Some(existing) => {
                trace!("modifying modem record {}", record);
                *existing = record;
            }
            None => {
                trace!("adding modem record {}", record);
                self.records.push(record);
            }
        }
        self.index_record(&record);
    }

    pub fn modify_or_add_controller_record(&mut self, address: InsteonAddress, group: u8, data: [u8; 3]) {
        self.modify_or_add_record(ModemDBRecord::create(address, group, true, data));
    }

    pub fn modify_or_add_responder_record(&mut self, address: InsteonAddress, group: u8, data: [u8; 3]) {
        self.modify_or_add_record(ModemDBRecord::create(address, group, false, data));
    }

    /// Remove a link. The peer entry goes away with its last record.
    pub fn delete_record(&mut self, address: InsteonAddress, group: u8, is_controller: bool) -> Option<ModemDBRecord> {
        let index = self
            .records
            .iter()
            .position(|r| same_link(r, address, group, is_controller))?;
        let removed = self.records.remove(index);
        if self.records.iter().all(|r| r.address() != address) {
            debug!("removing modem db entry for {}", address);
            self.entries.remove(&address);
        } else if let Some(entry) = self.entries.get_mut(&address) {
            entry.groups_mut(is_controller).remove(&group);
        }
        Some(removed)
    }

    pub fn changes(&self) -> Vec<ModemDBChange> {
        self.changes.clone()
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }

    pub fn poll_next_change(&mut self) -> Option<ModemDBChange> {
        if self.changes.is_empty() {
            None
        } else {
            Some(self.changes.remove(0))
        }
    }

    /// Put changes a write could not confirm back at the head of the queue. A
    /// change queued since for the same link supersedes the returned one.
    pub fn requeue_changes(&mut self, changes: impl IntoIterator<Item = ModemDBChange>) {
        let mut head: Vec<ModemDBChange> = changes
            .into_iter()
            .filter(|c| {
                let t = c.target();
                !self
                    .changes
                    .iter()
                    .any(|q| same_link(q.target(), t.address(), t.group(), t.is_controller()))
            })
            .collect();
        head.append(&mut self.changes);
        self.changes = head;
    }

    /// Queue a change; a pending change for the same address, group and role is
    /// replaced in place.
    pub fn add_change(&mut self, change: ModemDBChange) {
        let target = *change.target();
        match self
            .changes
            .iter_mut()
            .find(|c| same_link(c.target(), target.address(), target.group(), target.is_controller()))
        {
            Some(existing) => *existing = change,
            None => self.changes.push(change),
        }
    }

    pub fn mark_record_for_add(&mut self, address: InsteonAddress, group: u8, is_controller: bool, data: [u8; 3]) {
        self.add_change(ModemDBChange::for_add(ModemDBRecord::create(
            address,
            group,
            is_controller,
            data,
        )));
    }

    pub fn mark_record_for_modify(&mut self, record: &ModemDBRecord, data: [u8; 3]) {
        self.add_change(ModemDBChange::for_modify(record.with_data(data)));
    }

    pub fn mark_record_for_delete(&mut self, record: &ModemDBRecord) {
        self.add_change(ModemDBChange::for_delete(*record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::record::ChangeType;

    const DEV: InsteonAddress = InsteonAddress::new(0x11, 0x22, 0x33);
    const OTHER: InsteonAddress = InsteonAddress::new(0x44, 0x55, 0x66);

    #[test]
    fn derives_group_sets() {
        let mut db = ModemDB::new();
        db.load_records([
            ModemDBRecord::create(DEV, 0, true, [0x01, 0x20, 0x41]),
            ModemDBRecord::create(DEV, 1, false, [0x01, 0x20, 0x41]),
            ModemDBRecord::create(DEV, 3, false, [0, 0, 0]),
            ModemDBRecord::create(OTHER, 2, true, [0, 0, 0]),
        ]);
        let entry = db.entry(DEV).unwrap();
        assert_eq!(entry.controller_groups().iter().copied().collect::<Vec<_>>(), vec![0]);
        assert_eq!(entry.responder_groups().iter().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(entry.product_data().unwrap().device_category(), 0x01);
        assert_eq!(db.related_devices(2), vec![OTHER]);
        assert_eq!(db.broadcast_groups().into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut db = ModemDB::new();
        db.modify_or_add_responder_record(DEV, 1, [1, 2, 3]);
        db.modify_or_add_responder_record(DEV, 1, [4, 5, 6]);
        db.modify_or_add_controller_record(DEV, 1, [7, 8, 9]);
        assert_eq!(db.record_count(), 2);
        assert_eq!(db.record(DEV, 1, false).unwrap().data(), [4, 5, 6]);
        assert!(db.controller_groups(DEV).contains(&1));
    }

    #[test]
    fn delete_prunes_entries() {
        let mut db = ModemDB::new();
        db.modify_or_add_responder_record(DEV, 1, [0; 3]);
        db.modify_or_add_responder_record(DEV, 2, [0; 3]);
        db.delete_record(DEV, 1, false).unwrap();
        assert_eq!(db.responder_groups(DEV).into_iter().collect::<Vec<_>>(), vec![2]);
        db.delete_record(DEV, 2, false).unwrap();
        assert!(!db.has_entry(DEV));
        assert!(db.delete_record(DEV, 2, false).is_none());
    }

    #[test]
    fn last_change_wins_per_link() {
        let mut db = ModemDB::new();
        let record = ModemDBRecord::create(DEV, 1, true, [0; 3]);
        db.mark_record_for_modify(&record, [1, 1, 1]);
        db.mark_record_for_modify(&record, [2, 2, 2]);
        db.mark_record_for_modify(&record, [3, 3, 3]);
        db.mark_record_for_add(DEV, 1, false, [9, 9, 9]);
        let changes = db.changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].record().data(), [3, 3, 3]);
        assert_eq!(changes[1].change_type(), ChangeType::Add);
        assert_eq!(db.poll_next_change().unwrap().record().data(), [3, 3, 3]);
        assert_eq!(db.changes().len(), 1);
    }

    #[test]
    fn requeued_change_keeps_its_place() {
        let mut db = ModemDB::new();
        db.mark_record_for_add(DEV, 1, true, [1, 1, 1]);
        db.mark_record_for_add(DEV, 2, true, [2, 2, 2]);
        let sent = db.poll_next_change().unwrap();
        db.requeue_changes([sent]);
        let groups: Vec<u8> = db.changes().iter().map(|c| c.record().group()).collect();
        assert_eq!(groups, vec![1, 2]);
    }
}
