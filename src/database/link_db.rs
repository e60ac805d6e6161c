//! In-memory mirror of one device's all-link table.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::database::record::{LinkDBChange, LinkDBRecord, Record, RECORD_SIZE};
use crate::insteon::address::InsteonAddress;
use crate::logutil::hex_u16;

/// Location of the first record for most devices.
pub const DEFAULT_FIRST_LOCATION: u16 = 0x0FFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseStatus {
    Empty,
    Loading,
    Partial,
    Complete,
}

#[derive(Debug, Clone)]
pub struct LinkDB {
    // keyed by location; iterated in reverse so the highest location comes first
    records: BTreeMap<u16, LinkDBRecord>,
    changes: Vec<LinkDBChange>,
    status: DatabaseStatus,
    delta: Option<u8>,
    first_location: u16,
    reload: bool,
}

impl Default for LinkDB {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkDB {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            changes: Vec::new(),
            status: DatabaseStatus::Empty,
            delta: None,
            first_location: DEFAULT_FIRST_LOCATION,
            reload: false,
        }
    }

    pub fn status(&self) -> DatabaseStatus {
        self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status == DatabaseStatus::Complete
    }

    pub fn is_loading(&self) -> bool {
        self.status == DatabaseStatus::Loading
    }

    pub fn first_record_location(&self) -> u16 {
        self.first_location
    }

    pub fn set_first_record_location(&mut self, location: u16) {
        self.first_location = location;
    }

    pub fn database_delta(&self) -> Option<u8> {
        self.delta
    }

    /// Record the revision counter reported by the device. A change against a
    /// previously known value means the cached table is stale.
    pub fn update_database_delta(&mut self, delta: u8) {
        match self.delta {
            Some(old) if old != delta => {
                debug!("database delta changed {} -> {}, reload required", old, delta);
                self.reload = true;
            }
            _ => {}
        }
        self.delta = Some(delta);
    }

    pub fn should_refresh(&self) -> bool {
        self.reload
    }

    /// True unless a complete table is held and the device has not reported a
    /// newer revision.
    pub fn needs_download(&self) -> bool {
        self.reload || self.status != DatabaseStatus::Complete
    }

    pub fn set_reload(&mut self, reload: bool) {
        self.reload = reload;
    }

    pub fn clear_records(&mut self) {
        self.records.clear();
        self.status = DatabaseStatus::Empty;
    }

    /// Drop every record and start a fresh download.
    pub fn set_loading(&mut self) {
        self.records.clear();
        self.status = DatabaseStatus::Loading;
    }

    /// Records in scan order (highest location first).
    pub fn records(&self) -> Vec<LinkDBRecord> {
        self.records.values().rev().copied().collect()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, location: u16) -> Option<LinkDBRecord> {
        self.records.get(&location).copied()
    }

    /// Lowest-location record, which should be the high-water mark.
    pub fn last_record(&self) -> Option<LinkDBRecord> {
        self.records.values().next().copied()
    }

    pub fn active_records(&self) -> Vec<LinkDBRecord> {
        self.records_matching(None, None, None)
    }

    /// Active records filtered by any combination of address, group and role.
    pub fn records_matching(
        &self,
        address: Option<InsteonAddress>,
        group: Option<u8>,
        is_controller: Option<bool>,
    ) -> Vec<LinkDBRecord> {
        self.records
            .values()
            .rev()
            .filter(|r| r.is_active())
            .filter(|r| address.map_or(true, |a| r.address() == a))
            .filter(|r| group.map_or(true, |g| r.group() == g))
            .filter(|r| is_controller.map_or(true, |c| r.is_controller() == c))
            .copied()
            .collect()
    }

    pub fn controller_records(&self, address: Option<InsteonAddress>, group: Option<u8>) -> Vec<LinkDBRecord> {
        self.records_matching(address, group, Some(true))
    }

    pub fn responder_records(&self, address: Option<InsteonAddress>, group: Option<u8>) -> Vec<LinkDBRecord> {
        self.records_matching(address, group, Some(false))
    }

    /// Active record for a link, disambiguated by component id (data 3).
    pub fn active_record(
        &self,
        address: InsteonAddress,
        group: u8,
        is_controller: bool,
        component_id: u8,
    ) -> Option<LinkDBRecord> {
        self.records_matching(Some(address), Some(group), Some(is_controller))
            .into_iter()
            .find(|r| r.component_id() == component_id)
    }

    /// Devices this table links to.
    pub fn related_devices(&self) -> BTreeSet<InsteonAddress> {
        self.active_records().iter().map(|r| r.address()).collect()
    }

    /// Groups of `controller` this device responds to.
    pub fn broadcast_groups(&self, controller: InsteonAddress) -> BTreeSet<u8> {
        self.responder_records(Some(controller), None)
            .iter()
            .map(|r| r.group())
            .collect()
    }

    /// Add a downloaded record. While loading, a second record at the same
    /// location is rejected.
    pub fn add_record(&mut self, record: LinkDBRecord) -> bool {
        let location = record.location();
        if self.is_loading() && self.records.contains_key(&location) {
            trace!("ignoring duplicate record at {}", hex_u16(location));
            return false;
        }
        trace!("adding record {}", record);
        self.records.insert(location, record);
        true
    }

    /// Replace the table with cached records and recompute its status.
    pub fn load(&mut self, records: impl IntoIterator<Item = LinkDBRecord>) {
        self.records = records.into_iter().map(|r| (r.location(), r)).collect();
        self.update_status();
    }

    /// Completeness requires the expected first location, a high-water mark as
    /// the lowest record and no gaps in between.
    pub fn compute_status(&self) -> DatabaseStatus {
        let (Some(first), Some(last)) = (self.records.values().next_back(), self.records.values().next())
        else {
            return DatabaseStatus::Empty;
        };
        if first.location() != self.first_location {
            debug!(
                "first record at {} instead of {}",
                hex_u16(first.location()),
                hex_u16(self.first_location)
            );
            return DatabaseStatus::Partial;
        }
        if !last.is_last() {
            debug!("last record at {} is not the high-water mark", hex_u16(last.location()));
            return DatabaseStatus::Partial;
        }
        let expected = usize::from((first.location() - last.location()) / RECORD_SIZE) + 1;
        if self.records.len() != expected {
            debug!("{} records found, {} expected", self.records.len(), expected);
            return DatabaseStatus::Partial;
        }
        DatabaseStatus::Complete
    }

    pub fn update_status(&mut self) -> DatabaseStatus {
        self.status = self.compute_status();
        self.status
    }

    pub fn changes(&self) -> Vec<LinkDBChange> {
        self.changes.clone()
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }

    /// Remove and return the oldest pending change.
    pub fn poll_next_change(&mut self) -> Option<LinkDBChange> {
        if self.changes.is_empty() {
            None
        } else {
            Some(self.changes.remove(0))
        }
    }

    /// Put changes a write could not confirm back at the head of the queue. A
    /// change queued since for the same location supersedes the returned one.
    pub fn requeue_changes(&mut self, changes: impl IntoIterator<Item = LinkDBChange>) {
        let mut head: Vec<LinkDBChange> = changes
            .into_iter()
            .filter(|c| {
                !self
                    .changes
                    .iter()
                    .any(|q| q.target().location() == c.target().location())
            })
            .collect();
        head.append(&mut self.changes);
        self.changes = head;
    }

    /// Queue a change; a pending change for the same location is replaced in place.
    pub fn add_change(&mut self, change: LinkDBChange) {
        let location = change.target().location();
        match self
            .changes
            .iter_mut()
            .find(|c| c.target().location() == location)
        {
            Some(existing) => *existing = change,
            None => self.changes.push(change),
        }
    }

    /// First free slot not already claimed by a pending change. Deleted slots are
    /// reused before the table grows past the high-water mark.
    pub fn next_available_location(&self) -> Option<u16> {
        let claimed: HashSet<u16> = self.changes.iter().map(|c| c.target().location()).collect();
        if let Some(slot) = self
            .records
            .values()
            .rev()
            .find(|r| r.is_available() && !r.is_last() && !claimed.contains(&r.location()))
        {
            return Some(slot.location());
        }
        let mut location = match self.last_record() {
            Some(r) if r.is_last() => r.location(),
            Some(r) => r.location().checked_sub(RECORD_SIZE)?,
            None => self.first_location,
        };
        while claimed.contains(&location) {
            location = location.checked_sub(RECORD_SIZE)?;
        }
        Some(location)
    }

    pub fn mark_record_for_add(
        &mut self,
        address: InsteonAddress,
        group: u8,
        is_controller: bool,
        data: [u8; 3],
    ) -> Option<LinkDBRecord> {
        let Some(location) = self.next_available_location() else {
            warn!("no free location left to add a link to {}", address);
            return None;
        };
        let record = LinkDBRecord::create(location, address, group, is_controller, data);
        self.add_change(LinkDBChange::for_add(record));
        Some(record)
    }

    pub fn mark_record_for_modify(&mut self, record: &LinkDBRecord, data: [u8; 3]) {
        self.add_change(LinkDBChange::for_modify(record.with_data(data)));
    }

    pub fn mark_record_for_delete(&mut self, record: &LinkDBRecord) {
        self.add_change(LinkDBChange::for_delete(*record));
    }

    /// Reflect a change the device acknowledged. Writing over the high-water mark
    /// moves the mark down one slot.
    pub fn apply_change(&mut self, change: &LinkDBChange) {
        let record = change.record();
        let location = record.location();
        let was_last = self.records.get(&location).map_or(false, |r| r.is_last());
        self.records.insert(location, record);
        if was_last && !record.is_last() {
            if let Some(next) = location.checked_sub(RECORD_SIZE) {
                self.records
                    .entry(next)
                    .or_insert_with(|| LinkDBRecord::high_water_mark(next));
            }
        }
        trace!("applied change {}", change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::record::RecordType;

    fn addr() -> InsteonAddress {
        InsteonAddress::new(0x11, 0x22, 0x33)
    }

    fn table(locations: &[u16], hwm: u16) -> LinkDB {
        let mut db = LinkDB::new();
        let mut records: Vec<LinkDBRecord> = locations
            .iter()
            .map(|l| LinkDBRecord::create(*l, addr(), 1, true, [0x03, 0x1F, 0x01]))
            .collect();
        records.push(LinkDBRecord::high_water_mark(hwm));
        db.load(records);
        db
    }

    #[test]
    fn complete_table() {
        let db = table(&[0x0FFF, 0x0FF7], 0x0FEF);
        assert_eq!(db.status(), DatabaseStatus::Complete);
        assert_eq!(db.records()[0].location(), 0x0FFF);
    }

    #[test]
    fn wrong_first_location_is_partial() {
        let db = table(&[0x0FF7], 0x0FEF);
        assert_eq!(db.status(), DatabaseStatus::Partial);
    }

    #[test]
    fn missing_high_water_mark_is_partial() {
        let mut db = LinkDB::new();
        db.load([
            LinkDBRecord::create(0x0FFF, addr(), 1, true, [0; 3]),
            LinkDBRecord::create(0x0FF7, addr(), 2, true, [0; 3]),
        ]);
        assert_eq!(db.status(), DatabaseStatus::Partial);
    }

    #[test]
    fn gap_is_partial() {
        let db = table(&[0x0FFF, 0x0FEF], 0x0FE7);
        assert_eq!(db.status(), DatabaseStatus::Partial);
    }

    #[test]
    fn empty_table() {
        let mut db = LinkDB::new();
        assert_eq!(db.update_status(), DatabaseStatus::Empty);
    }

    #[test]
    fn duplicates_rejected_while_loading() {
        let mut db = LinkDB::new();
        db.set_loading();
        let first = LinkDBRecord::create(0x0FFF, addr(), 1, true, [1, 2, 3]);
        assert!(db.add_record(first));
        assert!(!db.add_record(first.with_data([9, 9, 9])));
        assert_eq!(db.record(0x0FFF).unwrap().data(), [1, 2, 3]);
    }

    #[test]
    fn same_location_change_is_replaced() {
        let mut db = table(&[0x0FFF], 0x0FF7);
        let record = db.record(0x0FFF).unwrap();
        for level in [0x10, 0x20, 0x30] {
            db.mark_record_for_modify(&record, [level, 0x1F, 0x01]);
        }
        let changes = db.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].record().data(), [0x30, 0x1F, 0x01]);
    }

    #[test]
    fn delete_keeps_slot() {
        let mut db = table(&[0x0FFF, 0x0FF7], 0x0FEF);
        let before = db.record_count();
        let record = db.record(0x0FF7).unwrap();
        db.mark_record_for_delete(&record);
        let change = db.poll_next_change().unwrap();
        db.apply_change(&change);
        assert_eq!(db.record_count(), before);
        assert!(db.record(0x0FF7).unwrap().is_available());
        assert_eq!(db.update_status(), DatabaseStatus::Complete);
    }

    #[test]
    fn add_reuses_deleted_slot_then_grows() {
        let mut db = table(&[0x0FFF, 0x0FF7], 0x0FEF);
        let deleted = LinkDBRecord::new(0x0FF7, RecordType::new(0x62), 1, addr(), [0; 3]);
        db.load([db.record(0x0FFF).unwrap(), deleted, LinkDBRecord::high_water_mark(0x0FEF)]);

        let a = db.mark_record_for_add(addr(), 5, false, [0xFF, 0x1F, 0x05]).unwrap();
        let b = db.mark_record_for_add(addr(), 6, false, [0xFF, 0x1F, 0x06]).unwrap();
        let c = db.mark_record_for_add(addr(), 7, false, [0xFF, 0x1F, 0x07]).unwrap();
        assert_eq!(a.location(), 0x0FF7);
        assert_eq!(b.location(), 0x0FEF);
        assert_eq!(c.location(), 0x0FE7);

        while let Some(change) = db.poll_next_change() {
            db.apply_change(&change);
        }
        assert_eq!(db.last_record().unwrap().location(), 0x0FDF);
        assert_eq!(db.update_status(), DatabaseStatus::Complete);
    }

    #[test]
    fn delta_change_requests_reload() {
        let mut db = LinkDB::new();
        db.update_database_delta(4);
        assert!(!db.should_refresh());
        db.update_database_delta(4);
        assert!(!db.should_refresh());
        db.update_database_delta(5);
        assert!(db.should_refresh());
    }

    #[test]
    fn unconfirmed_change_returns_to_the_head() {
        let mut db = table(&[0x0FFF, 0x0FF7], 0x0FEF);
        let first = db.record(0x0FFF).unwrap();
        let second = db.record(0x0FF7).unwrap();
        db.mark_record_for_modify(&first, [1, 1, 1]);
        db.mark_record_for_modify(&second, [2, 2, 2]);
        let sent = db.poll_next_change().unwrap();

        db.requeue_changes([sent]);
        let locations: Vec<u16> = db.changes().iter().map(|c| c.target().location()).collect();
        assert_eq!(locations, vec![0x0FFF, 0x0FF7]);

        // a newer edit of the same slot wins over the unconfirmed one
        let sent = db.poll_next_change().unwrap();
        db.mark_record_for_modify(&first, [3, 3, 3]);
        db.requeue_changes([sent]);
        let changes = db.changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].record().data(), [3, 3, 3]);
    }

    #[test]
    fn download_needed_until_complete_and_current() {
        assert!(LinkDB::new().needs_download());
        let mut db = table(&[0x0FFF], 0x0FF7);
        db.update_database_delta(4);
        assert!(!db.needs_download());
        db.update_database_delta(5);
        assert!(db.needs_download());
    }

    #[test]
    fn queries_filter_by_role() {
        let mut db = LinkDB::new();
        let modem = InsteonAddress::new(0xAA, 0xBB, 0xCC);
        db.load([
            LinkDBRecord::create(0x0FFF, modem, 0, true, [3, 0, 1]),
            LinkDBRecord::create(0x0FF7, modem, 1, false, [0xFF, 0x1F, 1]),
            LinkDBRecord::create(0x0FEF, modem, 2, false, [0xFF, 0x1F, 2]),
            LinkDBRecord::high_water_mark(0x0FE7),
        ]);
        assert_eq!(db.controller_records(Some(modem), None).len(), 1);
        assert_eq!(db.responder_records(None, Some(2)).len(), 1);
        assert_eq!(db.broadcast_groups(modem).into_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert!(db.active_record(modem, 1, false, 1).is_some());
        assert!(db.active_record(modem, 1, false, 9).is_none());
        assert_eq!(db.related_devices().len(), 1);
    }
}
