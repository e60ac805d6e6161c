//! Insteon PLM message codec.
//!
//! Every serial frame starts with `0x02` followed by a command byte. The layout of
//! the remaining bytes is fixed per command (and, for `0x62`, by the extended flag),
//! so a message is a definition plus a raw byte buffer. Fields are addressed by
//! name, the same names the PLM developer guide uses.

use std::fmt;

use crate::errors::MsgError;
use crate::insteon::address::InsteonAddress;

pub const START: u8 = 0x02;
pub const ACK: u8 = 0x06;
pub const NACK: u8 = 0x15;

/// Length of the user data block carried by extended messages.
pub const USER_DATA_LEN: usize = 14;

/// Default flags for an outgoing direct message (3 hops).
pub const FLAGS_STANDARD: u8 = 0x0F;
/// Default flags for an outgoing extended direct message (3 hops).
pub const FLAGS_EXTENDED: u8 = 0x1F;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ToModem,
    FromModem,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FieldKind {
    Byte,
    Address,
    Bytes(usize),
}

impl FieldKind {
    fn label(self) -> &'static str {
        match self {
            FieldKind::Byte => "byte",
            FieldKind::Address => "address",
            FieldKind::Bytes(_) => "byte array",
        }
    }

    fn width(self) -> usize {
        match self {
            FieldKind::Byte => 1,
            FieldKind::Address => 3,
            FieldKind::Bytes(n) => n,
        }
    }
}

#[derive(Debug)]
struct Field {
    name: &'static str,
    offset: usize,
    kind: FieldKind,
}

const fn byte(name: &'static str, offset: usize) -> Field {
    Field {
        name,
        offset,
        kind: FieldKind::Byte,
    }
}

const fn addr(name: &'static str, offset: usize) -> Field {
    Field {
        name,
        offset,
        kind: FieldKind::Address,
    }
}

const fn bytes(name: &'static str, offset: usize, len: usize) -> Field {
    Field {
        name,
        offset,
        kind: FieldKind::Bytes(len),
    }
}

#[derive(Debug)]
pub struct MsgDefinition {
    name: &'static str,
    command: u8,
    direction: Direction,
    length: usize,
    fields: &'static [Field],
}

impl MsgDefinition {
    fn field(&self, name: &str) -> Result<&'static Field, MsgError> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| MsgError::UnknownField {
                message: self.name,
                field: name.to_string(),
            })
    }

    fn has_ack_trailer(&self) -> bool {
        self.fields.iter().any(|f| f.name == "ACK/NACK")
    }
}

static DEFINITIONS: &[MsgDefinition] = &[
    MsgDefinition {
        name: "StandardMessageReceived",
        command: 0x50,
        direction: Direction::FromModem,
        length: 11,
        fields: &[
            addr("fromAddress", 2),
            addr("toAddress", 5),
            byte("messageFlags", 8),
            byte("command1", 9),
            byte("command2", 10),
        ],
    },
    MsgDefinition {
        name: "ExtendedMessageReceived",
        command: 0x51,
        direction: Direction::FromModem,
        length: 25,
        fields: &[
            addr("fromAddress", 2),
            addr("toAddress", 5),
            byte("messageFlags", 8),
            byte("command1", 9),
            byte("command2", 10),
            bytes("userData", 11, USER_DATA_LEN),
        ],
    },
    MsgDefinition {
        name: "ALLLinkRecordResponse",
        command: 0x57,
        direction: Direction::FromModem,
        length: 10,
        fields: &[
            byte("recordFlags", 2),
            byte("ALLLinkGroup", 3),
            addr("linkAddress", 4),
            bytes("linkData", 7, 3),
        ],
    },
    MsgDefinition {
        name: "SendStandardMessage",
        command: 0x62,
        direction: Direction::ToModem,
        length: 8,
        fields: &[
            addr("toAddress", 2),
            byte("messageFlags", 5),
            byte("command1", 6),
            byte("command2", 7),
        ],
    },
    MsgDefinition {
        name: "SendStandardMessageReply",
        command: 0x62,
        direction: Direction::FromModem,
        length: 9,
        fields: &[
            addr("toAddress", 2),
            byte("messageFlags", 5),
            byte("command1", 6),
            byte("command2", 7),
            byte("ACK/NACK", 8),
        ],
    },
    MsgDefinition {
        name: "SendExtendedMessage",
        command: 0x62,
        direction: Direction::ToModem,
        length: 22,
        fields: &[
            addr("toAddress", 2),
            byte("messageFlags", 5),
            byte("command1", 6),
            byte("command2", 7),
            bytes("userData", 8, USER_DATA_LEN),
        ],
    },
    MsgDefinition {
        name: "SendExtendedMessageReply",
        command: 0x62,
        direction: Direction::FromModem,
        length: 23,
        fields: &[
            addr("toAddress", 2),
            byte("messageFlags", 5),
            byte("command1", 6),
            byte("command2", 7),
            bytes("userData", 8, USER_DATA_LEN),
            byte("ACK/NACK", 22),
        ],
    },
    MsgDefinition {
        name: "GetFirstALLLinkRecord",
        command: 0x69,
        direction: Direction::ToModem,
        length: 2,
        fields: &[],
    },
    MsgDefinition {
        name: "GetFirstALLLinkRecordReply",
        command: 0x69,
        direction: Direction::FromModem,
        length: 3,
        fields: &[byte("ACK/NACK", 2)],
    },
    MsgDefinition {
        name: "GetNextALLLinkRecord",
        command: 0x6A,
        direction: Direction::ToModem,
        length: 2,
        fields: &[],
    },
    MsgDefinition {
        name: "GetNextALLLinkRecordReply",
        command: 0x6A,
        direction: Direction::FromModem,
        length: 3,
        fields: &[byte("ACK/NACK", 2)],
    },
    MsgDefinition {
        name: "ManageALLLinkRecord",
        command: 0x6F,
        direction: Direction::ToModem,
        length: 11,
        fields: &[
            byte("controlCode", 2),
            byte("recordFlags", 3),
            byte("ALLLinkGroup", 4),
            addr("linkAddress", 5),
            bytes("linkData", 8, 3),
        ],
    },
    MsgDefinition {
        name: "ManageALLLinkRecordReply",
        command: 0x6F,
        direction: Direction::FromModem,
        length: 12,
        fields: &[
            byte("controlCode", 2),
            byte("recordFlags", 3),
            byte("ALLLinkGroup", 4),
            addr("linkAddress", 5),
            bytes("linkData", 8, 3),
            byte("ACK/NACK", 11),
        ],
    },
];

/// Expected frame length for an inbound command, given whatever bytes are already
/// buffered. `None` means the command is unknown; `Some(None)` means more bytes are
/// needed before the length can be decided.
pub(crate) fn inbound_frame_len(buf: &[u8]) -> Option<Option<usize>> {
    let command = *buf.get(1)?;
    if command == 0x62 {
        // extended flag lives in the message flags byte
        return Some(buf.get(5).map(|flags| {
            if flags & 0x10 != 0 {
                23
            } else {
                9
            }
        }));
    }
    DEFINITIONS
        .iter()
        .find(|d| d.command == command && d.direction == Direction::FromModem)
        .map(|d| Some(d.length))
}

/// A single PLM frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Msg {
    def: &'static MsgDefinition,
    data: Vec<u8>,
}

impl PartialEq for MsgDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for MsgDefinition {}

impl Msg {
    /// Create an empty message of the named type.
    pub fn make(name: &str) -> Result<Self, MsgError> {
        let def = DEFINITIONS
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| MsgError::UnknownMessage(name.to_string()))?;
        let mut data = vec![0u8; def.length];
        data[0] = START;
        data[1] = def.command;
        Ok(Self { def, data })
    }

    /// Parse a complete frame received from the modem.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, MsgError> {
        let invalid = || MsgError::InvalidFrame {
            command: buf.get(1).copied().unwrap_or(0),
            len: buf.len(),
        };
        if buf.len() < 2 || buf[0] != START {
            return Err(invalid());
        }
        let def = DEFINITIONS
            .iter()
            .find(|d| {
                d.command == buf[1] && d.direction == Direction::FromModem && d.length == buf.len()
            })
            .ok_or_else(invalid)?;
        Ok(Self {
            def,
            data: buf.to_vec(),
        })
    }

    /// Standard direct message to a device.
    pub fn standard(to: InsteonAddress, cmd1: u8, cmd2: u8) -> Self {
        let mut data = vec![START, 0x62];
        data.extend_from_slice(&to.bytes());
        data.extend_from_slice(&[FLAGS_STANDARD, cmd1, cmd2]);
        Self {
            def: &DEFINITIONS[3],
            data,
        }
    }

    /// Extended direct message; `user_data` is zero padded to 14 bytes and the
    /// checksum is computed into user data 14.
    pub fn extended(to: InsteonAddress, cmd1: u8, cmd2: u8, user_data: &[u8]) -> Self {
        let mut data = vec![START, 0x62];
        data.extend_from_slice(&to.bytes());
        data.extend_from_slice(&[FLAGS_EXTENDED, cmd1, cmd2]);
        let mut ud = [0u8; USER_DATA_LEN];
        let n = user_data.len().min(USER_DATA_LEN - 1);
        ud[..n].copy_from_slice(&user_data[..n]);
        data.extend_from_slice(&ud);
        let mut msg = Self {
            def: &DEFINITIONS[5],
            data,
        };
        msg.set_crc();
        msg
    }

    pub fn name(&self) -> &'static str {
        self.def.name
    }

    pub fn command(&self) -> u8 {
        self.def.command
    }

    pub fn direction(&self) -> Direction {
        self.def.direction
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn typed_field(&self, name: &str, expected: FieldKind) -> Result<&'static Field, MsgError> {
        let field = self.def.field(name)?;
        let same = matches!(
            (field.kind, expected),
            (FieldKind::Byte, FieldKind::Byte)
                | (FieldKind::Address, FieldKind::Address)
                | (FieldKind::Bytes(_), FieldKind::Bytes(_))
        );
        if !same {
            return Err(MsgError::FieldType {
                message: self.def.name,
                field: field.name,
                expected: expected.label(),
            });
        }
        Ok(field)
    }

    pub fn get_byte(&self, name: &str) -> Result<u8, MsgError> {
        let field = self.typed_field(name, FieldKind::Byte)?;
        Ok(self.data[field.offset])
    }

    pub fn set_byte(&mut self, name: &str, value: u8) -> Result<(), MsgError> {
        let field = self.typed_field(name, FieldKind::Byte)?;
        self.data[field.offset] = value;
        Ok(())
    }

    pub fn get_address(&self, name: &str) -> Result<InsteonAddress, MsgError> {
        let field = self.typed_field(name, FieldKind::Address)?;
        InsteonAddress::from_slice(&self.data[field.offset..field.offset + 3])
    }

    pub fn set_address(&mut self, name: &str, address: InsteonAddress) -> Result<(), MsgError> {
        let field = self.typed_field(name, FieldKind::Address)?;
        self.data[field.offset..field.offset + 3].copy_from_slice(&address.bytes());
        Ok(())
    }

    pub fn get_bytes(&self, name: &str) -> Result<&[u8], MsgError> {
        let field = self.typed_field(name, FieldKind::Bytes(0))?;
        Ok(&self.data[field.offset..field.offset + field.kind.width()])
    }

    pub fn set_bytes(&mut self, name: &str, value: &[u8]) -> Result<(), MsgError> {
        let field = self.typed_field(name, FieldKind::Bytes(0))?;
        let width = field.kind.width();
        if value.len() != width {
            return Err(MsgError::FieldLength {
                field: field.name,
                expected: width,
                found: value.len(),
            });
        }
        self.data[field.offset..field.offset + width].copy_from_slice(value);
        Ok(())
    }

    /// User data byte `n` (1-based, as in the developer guide).
    pub fn user_data(&self, n: usize) -> Result<u8, MsgError> {
        let ud = self.get_bytes("userData")?;
        match n.checked_sub(1).and_then(|i| ud.get(i)) {
            Some(b) => Ok(*b),
            None => Err(MsgError::UnknownField {
                message: self.def.name,
                field: format!("userData{n}"),
            }),
        }
    }

    /// Big-endian 16-bit value held in user data `n` and `n + 1`.
    pub fn user_data_u16(&self, n: usize) -> Result<u16, MsgError> {
        Ok(u16::from_be_bytes([self.user_data(n)?, self.user_data(n + 1)?]))
    }

    fn crc_input(&self) -> Result<u8, MsgError> {
        let ud = self.get_bytes("userData")?;
        let cmd1 = self.get_byte("command1")?;
        let cmd2 = self.get_byte("command2")?;
        let sum = ud[..USER_DATA_LEN - 1]
            .iter()
            .fold(cmd1.wrapping_add(cmd2), |acc, b| acc.wrapping_add(*b));
        Ok(sum.wrapping_neg())
    }

    /// Store the checksum in user data 14. No-op for non-extended messages.
    pub fn set_crc(&mut self) {
        if let Ok(crc) = self.crc_input() {
            if let Ok(field) = self.def.field("userData") {
                self.data[field.offset + USER_DATA_LEN - 1] = crc;
            }
        }
    }

    /// Verify the checksum in user data 14.
    pub fn check_crc(&self) -> Result<(), MsgError> {
        let expected = self.crc_input()?;
        let found = self.user_data(USER_DATA_LEN)?;
        if expected == found {
            Ok(())
        } else {
            Err(MsgError::Checksum { expected, found })
        }
    }

    /// Modem echo of a host request (trailing ACK/NACK byte).
    pub fn is_reply(&self) -> bool {
        self.def.direction == Direction::FromModem && self.def.has_ack_trailer()
    }

    pub fn is_ack_reply(&self) -> bool {
        self.is_reply() && self.data.last() == Some(&ACK)
    }

    pub fn is_nack_reply(&self) -> bool {
        self.is_reply() && self.data.last() == Some(&NACK)
    }

    /// Insteon message received from the powerline/RF network.
    pub fn is_inbound(&self) -> bool {
        matches!(self.def.command, 0x50 | 0x51)
    }

    fn message_type(&self) -> Option<u8> {
        if !self.is_inbound() {
            return None;
        }
        self.get_byte("messageFlags").ok().map(|f| f >> 5)
    }

    pub fn is_extended(&self) -> bool {
        self.get_byte("messageFlags")
            .map(|f| f & 0x10 != 0)
            .unwrap_or(false)
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self.message_type(), Some(0b100) | Some(0b110))
    }

    pub fn is_direct(&self) -> bool {
        self.message_type() == Some(0b000)
    }

    pub fn is_direct_ack(&self) -> bool {
        self.message_type() == Some(0b001)
    }

    pub fn is_direct_nack(&self) -> bool {
        self.message_type() == Some(0b101)
    }

    /// Sender of an inbound Insteon message.
    pub fn from_address(&self) -> Option<InsteonAddress> {
        self.get_address("fromAddress").ok()
    }

    /// Reply the modem would echo back for this host request.
    pub fn echo(&self, ack: bool) -> Result<Self, MsgError> {
        let def = DEFINITIONS
            .iter()
            .find(|d| {
                d.command == self.def.command
                    && d.direction == Direction::FromModem
                    && d.has_ack_trailer()
                    && d.length == self.data.len() + 1
            })
            .ok_or_else(|| MsgError::UnknownMessage(format!("{}Reply", self.def.name)))?;
        let mut data = self.data.clone();
        data.push(if ack { ACK } else { NACK });
        Ok(Self { def, data })
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.def.name)?;
        for field in self.def.fields {
            let at = field.offset;
            match field.kind {
                FieldKind::Byte => write!(f, "|{}:{:02X}", field.name, self.data[at])?,
                FieldKind::Address => write!(
                    f,
                    "|{}:{:02X}.{:02X}.{:02X}",
                    field.name,
                    self.data[at],
                    self.data[at + 1],
                    self.data[at + 2]
                )?,
                FieldKind::Bytes(n) => {
                    write!(f, "|{}:", field.name)?;
                    for b in &self.data[at..at + n] {
                        write!(f, "{:02X}", b)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
