//! Write strategies. Each pops pending changes one at a time, pushes them to the
//! device and mirrors every acknowledged change into the model. Changes the
//! device rejected or never answered go back on the queue when the run ends.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::database::driver::{device_reply, send, DatabaseOperation, Outcome, Progress, ReplyKind, TimeoutPolicy};
use crate::database::reader::{MemoryRequest, PeekCursor, CMD_LINK_TABLE};
use crate::database::record::{ChangeType, LinkDBChange, ModemDBChange, Record, RECORD_SIZE};
use crate::device::{InsteonDevice, InsteonModem};
use crate::errors::MsgError;
use crate::insteon::msg::Msg;
use crate::insteon::transport::Transport;
use crate::logutil::hex_u16;
use crate::metrics;

/// D2 value selecting "write record" in an extended 0x2F message.
const LINK_TABLE_WRITE: u8 = 0x02;

const MANAGE_DELETE: u8 = 0x80;
const MANAGE_CONTROLLER: u8 = 0x40;
const MANAGE_RESPONDER: u8 = 0x41;

/// Requeue whatever the device did not confirm, then report. A stopped run
/// leaves status alone.
fn finish_link_write(device: &InsteonDevice, what: &str, outcome: Outcome, unconfirmed: Vec<LinkDBChange>) {
    let (status, pending) = {
        let mut db = device.link_db();
        db.requeue_changes(unconfirmed);
        let status = if outcome == Outcome::Stopped {
            db.status()
        } else {
            db.update_status()
        };
        (status, db.changes().len())
    };
    if pending > 0 {
        warn!("{}: {:?} with {} changes still pending", what, outcome, pending);
    } else {
        info!("{}: {:?}, link db {:?}", what, outcome, status);
    }
    if outcome != Outcome::Stopped {
        device.link_db_updated();
    }
}

/// Rejected changes in order, followed by the one still in flight.
fn take_unconfirmed<C>(rejected: &mut Vec<C>, current: Option<C>) -> Vec<C> {
    let mut all = std::mem::take(rejected);
    all.extend(current);
    all
}

/// Whole-record writes with extended 0x2F messages.
pub struct StandardLinkWrite {
    device: Arc<InsteonDevice>,
    timeout: Duration,
    what: String,
    current: Option<LinkDBChange>,
    rejected: Vec<LinkDBChange>,
}

impl StandardLinkWrite {
    pub fn new(device: Arc<InsteonDevice>, timeout: Duration) -> Self {
        let what = format!("link db write {}", device.address());
        Self {
            device,
            timeout,
            what,
            current: None,
            rejected: Vec::new(),
        }
    }

    fn write_next(&mut self, transport: &Transport) -> Progress {
        self.current = self.device.link_db().poll_next_change();
        let Some(change) = &self.current else {
            debug!("{}: no more changes", self.what);
            return Progress::Done;
        };
        let record = change.record();
        let [hi, lo] = record.location().to_be_bytes();
        let mut user_data = vec![0x00, LINK_TABLE_WRITE, hi, lo, RECORD_SIZE as u8];
        user_data.extend_from_slice(&record.to_bytes());
        trace!("{}: writing {}", self.what, change);
        send(
            transport,
            &self.what,
            Msg::extended(self.device.address(), CMD_LINK_TABLE, 0x00, &user_data),
        );
        Progress::Accepted
    }
}

impl DatabaseOperation for StandardLinkWrite {
    fn describe(&self) -> String {
        self.what.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::Abort
    }

    fn start(&mut self, transport: &Transport) -> Progress {
        self.write_next(transport)
    }

    fn handle_message(&mut self, msg: &Msg, transport: &Transport) -> Progress {
        let Some(reply) = device_reply(msg, self.device.address()) else {
            return Progress::Ignored;
        };
        if reply.cmd1 != CMD_LINK_TABLE || reply.extended {
            return Progress::Ignored;
        }
        let Some(change) = self.current.take() else {
            return Progress::Ignored;
        };
        match reply.kind {
            ReplyKind::Ack => {
                self.device.link_db().apply_change(&change);
                metrics::inc_changes_applied();
            }
            ReplyKind::Nack => {
                warn!("{}: device rejected {}", self.what, change);
                self.rejected.push(change);
            }
            ReplyKind::Direct => {
                self.current = Some(change);
                return Progress::Ignored;
            }
        }
        self.write_next(transport)
    }

    fn finish(&mut self, outcome: Outcome) {
        let unconfirmed = take_unconfirmed(&mut self.rejected, self.current.take());
        finish_link_write(&self.device, &self.what, outcome, unconfirmed);
    }
}

/// Byte writes through peek/poke. Bytes that already hold the wanted value are
/// not poked.
pub struct PokeLinkWrite {
    device: Arc<InsteonDevice>,
    timeout: Duration,
    what: String,
    cursor: PeekCursor,
    current: Option<LinkDBChange>,
    rejected: Vec<LinkDBChange>,
    bytes: [u8; 8],
    index: u16,
}

impl PokeLinkWrite {
    pub fn new(device: Arc<InsteonDevice>, timeout: Duration) -> Self {
        let what = format!("link db poke {}", device.address());
        Self {
            device,
            timeout,
            what,
            cursor: PeekCursor::default(),
            current: None,
            rejected: Vec::new(),
            bytes: [0; 8],
            index: 0,
        }
    }

    fn current_address(&self) -> Option<u16> {
        self.current
            .as_ref()
            .map(|c| c.record().byte_address(self.index))
    }

    fn write_next(&mut self, transport: &Transport) -> Progress {
        self.current = self.device.link_db().poll_next_change();
        let Some(change) = &self.current else {
            debug!("{}: no more changes", self.what);
            return Progress::Done;
        };
        trace!("{}: writing {}", self.what, change);
        self.bytes = change.record().to_bytes();
        self.index = 0;
        self.peek_current(transport);
        Progress::Accepted
    }

    fn peek_current(&mut self, transport: &Transport) {
        if let Some(address) = self.current_address() {
            self.cursor
                .peek(transport, &self.what, self.device.address(), address);
        }
    }

    /// Move to the next byte, or to the next change once the record is written.
    fn advance(&mut self, transport: &Transport) -> Progress {
        self.index += 1;
        if self.index < RECORD_SIZE {
            self.peek_current(transport);
            return Progress::Accepted;
        }
        if let Some(change) = self.current.take() {
            self.device.link_db().apply_change(&change);
            metrics::inc_changes_applied();
        }
        self.write_next(transport)
    }
}

impl DatabaseOperation for PokeLinkWrite {
    fn describe(&self) -> String {
        self.what.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::Abort
    }

    fn start(&mut self, transport: &Transport) -> Progress {
        self.cursor.reset();
        self.write_next(transport)
    }

    fn handle_message(&mut self, msg: &Msg, transport: &Transport) -> Progress {
        let Some(reply) = device_reply(msg, self.device.address()) else {
            return Progress::Ignored;
        };
        if self.current.is_none() {
            return Progress::Ignored;
        }
        if reply.kind == ReplyKind::Nack {
            warn!("{}: device rejected command {:02X}, skipping change", self.what, reply.cmd1);
            self.rejected.extend(self.current.take());
            return self.write_next(transport);
        }
        match self.cursor.on_ack(&reply) {
            Some(MemoryRequest::SetMsb(_)) => {
                self.peek_current(transport);
                Progress::Accepted
            }
            Some(MemoryRequest::Peek(address)) => {
                let wanted = self.bytes[usize::from(self.index)];
                if reply.cmd2 == wanted {
                    trace!("{}: byte at {} already {:02X}", self.what, hex_u16(address), wanted);
                    self.advance(transport)
                } else {
                    self.cursor
                        .poke(transport, &self.what, self.device.address(), address, wanted);
                    Progress::Accepted
                }
            }
            Some(MemoryRequest::Poke(_)) => self.advance(transport),
            None => Progress::Ignored,
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        let unconfirmed = take_unconfirmed(&mut self.rejected, self.current.take());
        finish_link_write(&self.device, &self.what, outcome, unconfirmed);
    }
}

/// Modem table writes with manage-all-link (0x6F).
pub struct ModemManageWrite {
    modem: Arc<InsteonModem>,
    timeout: Duration,
    current: Option<ModemDBChange>,
    rejected: Vec<ModemDBChange>,
}

impl ModemManageWrite {
    pub fn new(modem: Arc<InsteonModem>, timeout: Duration) -> Self {
        Self {
            modem,
            timeout,
            current: None,
            rejected: Vec::new(),
        }
    }

    fn build(change: &ModemDBChange) -> Result<Msg, MsgError> {
        let record = change.record();
        let control = match change.change_type() {
            ChangeType::Delete => MANAGE_DELETE,
            _ if record.is_controller() => MANAGE_CONTROLLER,
            _ => MANAGE_RESPONDER,
        };
        let mut msg = Msg::make("ManageALLLinkRecord")?;
        msg.set_byte("controlCode", control)?;
        msg.set_byte("recordFlags", record.record_type().as_byte())?;
        msg.set_byte("ALLLinkGroup", record.group())?;
        msg.set_address("linkAddress", record.address())?;
        msg.set_bytes("linkData", &record.data())?;
        Ok(msg)
    }

    fn write_next(&mut self, transport: &Transport) -> Progress {
        loop {
            self.current = self.modem.db().poll_next_change();
            let Some(change) = &self.current else {
                debug!("modem db write: no more changes");
                return Progress::Done;
            };
            match Self::build(change) {
                Ok(msg) => {
                    trace!("modem db write: {}", change);
                    send(transport, "modem db write", msg);
                    return Progress::Accepted;
                }
                Err(e) => warn!("modem db write: skipping {}: {}", change, e),
            }
        }
    }

    fn matches_current(&self, msg: &Msg) -> bool {
        let Some(change) = &self.current else {
            return false;
        };
        let target = change.target();
        msg.get_address("linkAddress").ok() == Some(target.address())
            && msg.get_byte("ALLLinkGroup").ok() == Some(target.group())
    }

    fn apply(&self, change: &ModemDBChange) {
        let target = *change.target();
        {
            let mut db = self.modem.db();
            match change.change_type() {
                ChangeType::Delete => {
                    db.delete_record(target.address(), target.group(), target.is_controller());
                }
                _ => db.modify_or_add_record(change.record()),
            }
        }
        metrics::inc_changes_applied();
        self.modem
            .database_link_updated(target.address(), target.group(), target.is_controller());
    }
}

impl DatabaseOperation for ModemManageWrite {
    fn describe(&self) -> String {
        "modem db write".to_string()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::Abort
    }

    fn start(&mut self, transport: &Transport) -> Progress {
        self.write_next(transport)
    }

    fn handle_message(&mut self, msg: &Msg, transport: &Transport) -> Progress {
        if msg.command() != 0x6F || !msg.is_reply() || !self.matches_current(msg) {
            return Progress::Ignored;
        }
        let Some(change) = self.current.take() else {
            return Progress::Ignored;
        };
        if msg.is_ack_reply() {
            self.apply(&change);
        } else {
            warn!("modem db write: modem rejected {}", change);
            self.rejected.push(change);
        }
        self.write_next(transport)
    }

    fn finish(&mut self, outcome: Outcome) {
        let unconfirmed = take_unconfirmed(&mut self.rejected, self.current.take());
        let pending = {
            let mut db = self.modem.db();
            db.requeue_changes(unconfirmed);
            db.changes().len()
        };
        if pending > 0 {
            warn!("modem db write: {:?} with {} changes still pending", outcome, pending);
        } else {
            info!("modem db write: {:?}", outcome);
        }
        if outcome != Outcome::Stopped {
            self.modem.database_updated();
        }
    }
}
