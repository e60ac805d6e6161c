//! Read strategies: standard record reads, byte peeks for I1 devices and the
//! modem's get-first/get-next enumeration.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::database::driver::{
    device_reply, send, DatabaseOperation, DeviceReply, Outcome, Progress, ReplyKind, TimeoutPolicy,
};
use crate::database::record::{LinkDBRecord, ModemDBRecord, Record, RECORD_SIZE};
use crate::device::{InsteonDevice, InsteonModem};
use crate::errors::MsgError;
use crate::insteon::address::InsteonAddress;
use crate::insteon::msg::Msg;
use crate::insteon::transport::Transport;
use crate::logutil::hex_u16;
use crate::metrics;

pub(crate) const CMD_SET_MSB: u8 = 0x28;
pub(crate) const CMD_POKE: u8 = 0x29;
pub(crate) const CMD_PEEK: u8 = 0x2B;
pub(crate) const CMD_LINK_TABLE: u8 = 0x2F;

/// D2 value marking an extended 0x2F message as a record response.
const LINK_TABLE_RECORD: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemoryRequest {
    SetMsb(u8),
    Peek(u16),
    Poke(u16),
}

/// Byte-addressed access to device memory. The MSB is only sent when it differs
/// from the one the device already holds.
#[derive(Debug, Default)]
pub(crate) struct PeekCursor {
    msb: Option<u8>,
    pending: Option<MemoryRequest>,
}

impl PeekCursor {
    pub(crate) fn reset(&mut self) {
        self.msb = None;
        self.pending = None;
    }

    pub(crate) fn peek(&mut self, transport: &Transport, what: &str, device: InsteonAddress, address: u16) {
        let [msb, lsb] = address.to_be_bytes();
        if self.msb != Some(msb) {
            trace!("{}: set MSB {:02X}", what, msb);
            self.pending = Some(MemoryRequest::SetMsb(msb));
            send(transport, what, Msg::standard(device, CMD_SET_MSB, msb));
        } else {
            trace!("{}: peek {}", what, hex_u16(address));
            self.pending = Some(MemoryRequest::Peek(address));
            metrics::inc_peeks();
            send(transport, what, Msg::standard(device, CMD_PEEK, lsb));
        }
    }

    /// Write `value` at the most recently peeked address.
    pub(crate) fn poke(&mut self, transport: &Transport, what: &str, device: InsteonAddress, address: u16, value: u8) {
        trace!("{}: poke {} = {:02X}", what, hex_u16(address), value);
        self.pending = Some(MemoryRequest::Poke(address));
        metrics::inc_pokes();
        send(transport, what, Msg::standard(device, CMD_POKE, value));
    }

    /// Match an acknowledgement against the outstanding request.
    pub(crate) fn on_ack(&mut self, reply: &DeviceReply) -> Option<MemoryRequest> {
        let expected = match self.pending? {
            MemoryRequest::SetMsb(_) => CMD_SET_MSB,
            MemoryRequest::Peek(_) => CMD_PEEK,
            MemoryRequest::Poke(_) => CMD_POKE,
        };
        if reply.kind != ReplyKind::Ack || reply.extended || reply.cmd1 != expected {
            return None;
        }
        let done = self.pending.take()?;
        if let MemoryRequest::SetMsb(msb) = done {
            self.msb = Some(msb);
        }
        Some(done)
    }
}

fn accept_record(device: &InsteonDevice, what: &str, record: LinkDBRecord) {
    if device.link_db().add_record(record) {
        trace!("{}: got record {}", what, record);
        metrics::inc_records_accepted();
    } else {
        metrics::inc_records_rejected();
    }
}

/// A stopped run leaves the model as it stands; the next read starts over.
fn finish_link_read(device: &InsteonDevice, what: &str, outcome: Outcome) {
    if outcome == Outcome::Stopped {
        debug!("{}: stopped", what);
        return;
    }
    let (status, count) = {
        let mut db = device.link_db();
        let status = db.update_status();
        if db.is_complete() {
            db.set_reload(false);
        }
        (status, db.record_count())
    };
    info!("{}: {:?} with {} records ({:?})", what, status, count, outcome);
    device.link_db_updated();
}

/// Whole-record reads with extended 0x2F messages.
pub struct StandardLinkRead {
    device: Arc<InsteonDevice>,
    timeout: Duration,
    what: String,
}

impl StandardLinkRead {
    pub fn new(device: Arc<InsteonDevice>, timeout: Duration) -> Self {
        let what = format!("link db read {}", device.address());
        Self { device, timeout, what }
    }

    fn on_record(&mut self, msg: &Msg) -> Result<Progress, MsgError> {
        if msg.user_data(2)? != LINK_TABLE_RECORD {
            return Ok(Progress::Ignored);
        }
        if self.device.engine().supports_checksum() {
            if let Err(e) = msg.check_crc() {
                warn!("{}: dropping record: {}", self.what, e);
                metrics::inc_records_rejected();
                return Ok(Progress::Ignored);
            }
        }
        let location = msg.user_data_u16(3)?;
        let mut bytes = [0u8; 8];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = msg.user_data(6 + i)?;
        }
        let record = LinkDBRecord::from_bytes(location, &bytes);
        accept_record(&self.device, &self.what, record);
        if record.is_last() {
            Ok(Progress::Done)
        } else {
            Ok(Progress::Accepted)
        }
    }
}

impl DatabaseOperation for StandardLinkRead {
    fn describe(&self) -> String {
        self.what.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::Restart
    }

    fn start(&mut self, transport: &Transport) -> Progress {
        self.device.link_db().set_loading();
        // location 0 with D5 = 0 asks for the whole table
        let request = Msg::extended(self.device.address(), CMD_LINK_TABLE, 0x00, &[0x00; 5]);
        send(transport, &self.what, request);
        Progress::Accepted
    }

    fn handle_message(&mut self, msg: &Msg, _transport: &Transport) -> Progress {
        let Some(reply) = device_reply(msg, self.device.address()) else {
            return Progress::Ignored;
        };
        if reply.cmd1 != CMD_LINK_TABLE {
            return Progress::Ignored;
        }
        match (reply.kind, reply.extended) {
            (ReplyKind::Ack, false) => {
                debug!("{}: request acknowledged", self.what);
                Progress::Accepted
            }
            (ReplyKind::Nack, _) => {
                warn!("{}: device rejected the read", self.what);
                Progress::Done
            }
            (_, true) => self.on_record(msg).unwrap_or_else(|e| {
                warn!("{}: bad record message: {}", self.what, e);
                Progress::Ignored
            }),
            _ => Progress::Ignored,
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        finish_link_read(&self.device, &self.what, outcome);
    }
}

/// Byte-at-a-time reads for devices without record commands.
pub struct PeekLinkRead {
    device: Arc<InsteonDevice>,
    timeout: Duration,
    what: String,
    cursor: PeekCursor,
    location: u16,
    index: u16,
    bytes: [u8; 8],
}

impl PeekLinkRead {
    pub fn new(device: Arc<InsteonDevice>, timeout: Duration) -> Self {
        let what = format!("link db peek {}", device.address());
        Self {
            device,
            timeout,
            what,
            cursor: PeekCursor::default(),
            location: 0,
            index: 0,
            bytes: [0; 8],
        }
    }

    fn request_next(&mut self, transport: &Transport) {
        let address = self
            .location
            .wrapping_sub(RECORD_SIZE - 1)
            .wrapping_add(self.index);
        self.cursor
            .peek(transport, &self.what, self.device.address(), address);
    }

    fn on_byte(&mut self, value: u8, transport: &Transport) -> Progress {
        self.bytes[usize::from(self.index)] = value;
        self.index += 1;
        if self.index < RECORD_SIZE {
            self.request_next(transport);
            return Progress::Accepted;
        }
        let record = LinkDBRecord::from_bytes(self.location, &self.bytes);
        accept_record(&self.device, &self.what, record);
        if record.is_last() {
            return Progress::Done;
        }
        match self.location.checked_sub(RECORD_SIZE) {
            Some(next) => {
                self.location = next;
                self.index = 0;
                self.request_next(transport);
                Progress::Accepted
            }
            None => {
                warn!("{}: ran out of memory without a high-water mark", self.what);
                Progress::Done
            }
        }
    }
}

impl DatabaseOperation for PeekLinkRead {
    fn describe(&self) -> String {
        self.what.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::Restart
    }

    fn start(&mut self, transport: &Transport) -> Progress {
        self.location = {
            let mut db = self.device.link_db();
            db.set_loading();
            db.first_record_location()
        };
        self.index = 0;
        self.cursor.reset();
        self.request_next(transport);
        Progress::Accepted
    }

    fn handle_message(&mut self, msg: &Msg, transport: &Transport) -> Progress {
        let Some(reply) = device_reply(msg, self.device.address()) else {
            return Progress::Ignored;
        };
        if reply.kind == ReplyKind::Nack {
            warn!("{}: device rejected command {:02X}", self.what, reply.cmd1);
            return Progress::Done;
        }
        match self.cursor.on_ack(&reply) {
            Some(MemoryRequest::SetMsb(_)) => {
                self.request_next(transport);
                Progress::Accepted
            }
            Some(MemoryRequest::Peek(_)) => self.on_byte(reply.cmd2, transport),
            Some(MemoryRequest::Poke(_)) | None => Progress::Ignored,
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        finish_link_read(&self.device, &self.what, outcome);
    }
}

fn modem_record(msg: &Msg) -> Result<ModemDBRecord, MsgError> {
    let mut bytes = [0u8; 8];
    bytes[0] = msg.get_byte("recordFlags")?;
    bytes[1] = msg.get_byte("ALLLinkGroup")?;
    bytes[2..5].copy_from_slice(&msg.get_address("linkAddress")?.bytes());
    bytes[5..8].copy_from_slice(msg.get_bytes("linkData")?);
    Ok(ModemDBRecord::from_bytes(&bytes))
}

/// Get-first/get-next walk of the modem table. Any timeout restarts from the
/// first record.
pub struct ModemEnumeration {
    modem: Arc<InsteonModem>,
    timeout: Duration,
}

impl ModemEnumeration {
    pub fn new(modem: Arc<InsteonModem>, timeout: Duration) -> Self {
        Self { modem, timeout }
    }

    fn request(&self, transport: &Transport, name: &str) {
        match Msg::make(name) {
            Ok(msg) => send(transport, "modem db read", msg),
            Err(e) => warn!("modem db read: cannot build {}: {}", name, e),
        }
    }
}

impl DatabaseOperation for ModemEnumeration {
    fn describe(&self) -> String {
        "modem db read".to_string()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::Restart
    }

    fn start(&mut self, transport: &Transport) -> Progress {
        self.modem.db().clear();
        self.request(transport, "GetFirstALLLinkRecord");
        Progress::Accepted
    }

    fn handle_message(&mut self, msg: &Msg, transport: &Transport) -> Progress {
        match msg.command() {
            0x69 | 0x6A if msg.is_reply() => {
                if msg.is_nack_reply() {
                    debug!("modem db read: end of table");
                    Progress::Done
                } else {
                    Progress::Accepted
                }
            }
            0x57 => match modem_record(msg) {
                Ok(record) => {
                    trace!("modem db read: got record {}", record);
                    self.modem.db().add_record(record);
                    metrics::inc_records_accepted();
                    self.request(transport, "GetNextALLLinkRecord");
                    Progress::Accepted
                }
                Err(e) => {
                    warn!("modem db read: bad record message: {}", e);
                    Progress::Ignored
                }
            },
            _ => Progress::Ignored,
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        let complete = outcome == Outcome::Completed;
        self.modem.db().set_complete(complete);
        match outcome {
            Outcome::Stopped => {}
            _ if complete => self.modem.database_completed(),
            _ => {
                warn!("modem db read ended {:?}, table may be incomplete", outcome);
                self.modem.database_updated();
            }
        }
    }
}
