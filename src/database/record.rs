//! All-link record value types and pending change descriptors.
//!
//! A record is eight bytes on the wire: flags, group, peer address (3) and data (3).
//! Device link records additionally carry the memory location they live at; modem
//! records have no addressable location.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::insteon::address::InsteonAddress;

/// Size of one record in device memory.
pub const RECORD_SIZE: u16 = 8;

/// Record flags byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordType(u8);

impl RecordType {
    const IN_USE: u8 = 0x80;
    const CONTROLLER: u8 = 0x40;
    const USED_BEFORE: u8 = 0x02;

    pub const fn new(flags: u8) -> Self {
        Self(flags)
    }

    pub const fn controller() -> Self {
        Self(Self::IN_USE | Self::CONTROLLER | Self::USED_BEFORE)
    }

    pub const fn responder() -> Self {
        Self(Self::IN_USE | Self::USED_BEFORE)
    }

    pub const fn for_role(is_controller: bool) -> Self {
        if is_controller {
            Self::controller()
        } else {
            Self::responder()
        }
    }

    /// End-of-table sentinel: never used, not in use.
    pub const fn high_water_mark() -> Self {
        Self(0x00)
    }

    pub const fn as_byte(self) -> u8 {
        self.0
    }

    pub const fn is_active(self) -> bool {
        self.0 & Self::IN_USE != 0
    }

    pub const fn is_available(self) -> bool {
        !self.is_active()
    }

    pub const fn is_controller(self) -> bool {
        self.0 & Self::CONTROLLER != 0
    }

    pub const fn is_responder(self) -> bool {
        !self.is_controller()
    }

    pub const fn is_high_water_mark(self) -> bool {
        self.0 & Self::USED_BEFORE == 0
    }

    /// Same flags with the in-use bit cleared. The slot stays "used before" so a
    /// deleted record never turns into a premature high-water mark.
    pub const fn as_inactive(self) -> Self {
        Self((self.0 & !Self::IN_USE) | Self::USED_BEFORE)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_high_water_mark() && !self.is_active() {
            return f.write_str("HWM");
        }
        let status = if self.is_active() { "A" } else { "I" };
        let role = if self.is_controller() { "C" } else { "R" };
        write!(f, "{}|{}|0x{:02X}", status, role, self.0)
    }
}

/// Behaviour shared by modem and device records.
pub trait Record: Clone + fmt::Display {
    /// Memory location; 0 for records without one.
    fn location(&self) -> u16;
    fn record_type(&self) -> RecordType;
    fn group(&self) -> u8;
    fn address(&self) -> InsteonAddress;
    fn data(&self) -> [u8; 3];
    /// Copy of this record flagged as deleted.
    fn as_inactive(&self) -> Self;

    fn is_active(&self) -> bool {
        self.record_type().is_active()
    }

    fn is_available(&self) -> bool {
        self.record_type().is_available()
    }

    fn is_controller(&self) -> bool {
        self.record_type().is_controller()
    }

    fn is_responder(&self) -> bool {
        self.record_type().is_responder()
    }

    /// True for the high-water-mark record ending a table scan.
    fn is_last(&self) -> bool {
        self.record_type().is_high_water_mark()
    }

    /// Eight byte wire form.
    fn to_bytes(&self) -> [u8; 8] {
        let a = self.address().bytes();
        let d = self.data();
        [
            self.record_type().as_byte(),
            self.group(),
            a[0],
            a[1],
            a[2],
            d[0],
            d[1],
            d[2],
        ]
    }
}

/// Record stored in a remote device link table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkDBRecord {
    location: u16,
    record_type: RecordType,
    group: u8,
    address: InsteonAddress,
    data: [u8; 3],
}

impl LinkDBRecord {
    pub fn new(
        location: u16,
        record_type: RecordType,
        group: u8,
        address: InsteonAddress,
        data: [u8; 3],
    ) -> Self {
        Self {
            location,
            record_type,
            group,
            address,
            data,
        }
    }

    /// Active controller or responder record.
    pub fn create(
        location: u16,
        address: InsteonAddress,
        group: u8,
        is_controller: bool,
        data: [u8; 3],
    ) -> Self {
        Self::new(location, RecordType::for_role(is_controller), group, address, data)
    }

    pub fn high_water_mark(location: u16) -> Self {
        Self::new(
            location,
            RecordType::high_water_mark(),
            0,
            InsteonAddress::default(),
            [0; 3],
        )
    }

    /// Parse the eight byte wire form read at `location`.
    pub fn from_bytes(location: u16, bytes: &[u8; 8]) -> Self {
        Self {
            location,
            record_type: RecordType::new(bytes[0]),
            group: bytes[1],
            address: InsteonAddress::new(bytes[2], bytes[3], bytes[4]),
            data: [bytes[5], bytes[6], bytes[7]],
        }
    }

    pub fn with_data(&self, data: [u8; 3]) -> Self {
        Self { data, ..*self }
    }

    pub fn on_level(&self) -> u8 {
        self.data[0]
    }

    pub fn ramp_rate(&self) -> u8 {
        self.data[1]
    }

    pub fn component_id(&self) -> u8 {
        self.data[2]
    }

    /// Memory address holding wire byte `index` (0..8) of this record.
    pub fn byte_address(&self, index: u16) -> u16 {
        self.location.wrapping_sub(RECORD_SIZE - 1).wrapping_add(index)
    }
}

impl Record for LinkDBRecord {
    fn location(&self) -> u16 {
        self.location
    }

    fn record_type(&self) -> RecordType {
        self.record_type
    }

    fn group(&self) -> u8 {
        self.group
    }

    fn address(&self) -> InsteonAddress {
        self.address
    }

    fn data(&self) -> [u8; 3] {
        self.data
    }

    fn as_inactive(&self) -> Self {
        Self {
            record_type: self.record_type.as_inactive(),
            ..*self
        }
    }
}

impl fmt::Display for LinkDBRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:04X} {} group: {} address: {} data: {:02X} {:02X} {:02X}",
            self.location,
            self.record_type,
            self.group,
            self.address,
            self.data[0],
            self.data[1],
            self.data[2]
        )
    }
}

/// Record stored in the modem all-link table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModemDBRecord {
    record_type: RecordType,
    group: u8,
    address: InsteonAddress,
    data: [u8; 3],
}

impl ModemDBRecord {
    pub fn new(record_type: RecordType, group: u8, address: InsteonAddress, data: [u8; 3]) -> Self {
        Self {
            record_type,
            group,
            address,
            data,
        }
    }

    pub fn create(address: InsteonAddress, group: u8, is_controller: bool, data: [u8; 3]) -> Self {
        Self::new(RecordType::for_role(is_controller), group, address, data)
    }

    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        Self {
            record_type: RecordType::new(bytes[0]),
            group: bytes[1],
            address: InsteonAddress::new(bytes[2], bytes[3], bytes[4]),
            data: [bytes[5], bytes[6], bytes[7]],
        }
    }

    pub fn with_data(&self, data: [u8; 3]) -> Self {
        Self { data, ..*self }
    }

    pub fn device_category(&self) -> u8 {
        self.data[0]
    }

    pub fn sub_category(&self) -> u8 {
        self.data[1]
    }

    pub fn firmware(&self) -> u8 {
        self.data[2]
    }
}

impl Record for ModemDBRecord {
    fn location(&self) -> u16 {
        0
    }

    fn record_type(&self) -> RecordType {
        self.record_type
    }

    fn group(&self) -> u8 {
        self.group
    }

    fn address(&self) -> InsteonAddress {
        self.address
    }

    fn data(&self) -> [u8; 3] {
        self.data
    }

    fn as_inactive(&self) -> Self {
        Self {
            record_type: self.record_type.as_inactive(),
            ..*self
        }
    }
}

impl fmt::Display for ModemDBRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} group: {} address: {} data: {:02X} {:02X} {:02X}",
            self.record_type, self.group, self.address, self.data[0], self.data[1], self.data[2]
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
}

/// Pending change to a database, applied one at a time by a writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseChange<R: Record> {
    record: R,
    change_type: ChangeType,
}

pub type LinkDBChange = DatabaseChange<LinkDBRecord>;
pub type ModemDBChange = DatabaseChange<ModemDBRecord>;

impl<R: Record> DatabaseChange<R> {
    pub fn new(record: R, change_type: ChangeType) -> Self {
        Self {
            record,
            change_type,
        }
    }

    pub fn for_add(record: R) -> Self {
        Self::new(record, ChangeType::Add)
    }

    pub fn for_modify(record: R) -> Self {
        Self::new(record, ChangeType::Modify)
    }

    pub fn for_delete(record: R) -> Self {
        Self::new(record, ChangeType::Delete)
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    /// Record as it should end up on the device; deletes expose the inactive form.
    pub fn record(&self) -> R {
        match self.change_type {
            ChangeType::Delete => self.record.as_inactive(),
            _ => self.record.clone(),
        }
    }

    /// Record as originally marked, before the delete flag is applied.
    pub fn target(&self) -> &R {
        &self.record
    }
}

impl<R: Record> fmt::Display for DatabaseChange<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.change_type, self.record())
    }
}
