use thiserror::Error;

/// Errors raised while building or reading Insteon messages.
#[derive(Debug, Error)]
pub enum MsgError {
    /// No message definition exists with this name.
    #[error("unknown message type: {0}")]
    UnknownMessage(String),

    /// The message definition has no field with this name.
    #[error("{message} has no field {field}")]
    UnknownField {
        message: &'static str,
        field: String,
    },

    /// Field exists but holds a different kind of value.
    #[error("{message} field {field} is not a {expected}")]
    FieldType {
        message: &'static str,
        field: &'static str,
        expected: &'static str,
    },

    /// Byte array assigned to a field of a different length.
    #[error("{field} expects {expected} bytes, got {found}")]
    FieldLength {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    /// Raw buffer does not match any known frame layout.
    #[error("cannot parse {len} byte frame starting with command 0x{command:02X}")]
    InvalidFrame { command: u8, len: usize },

    /// Extended message checksum does not match its user data.
    #[error("checksum mismatch: expected 0x{expected:02X}, found 0x{found:02X}")]
    Checksum { expected: u8, found: u8 },

    /// Malformed textual Insteon address.
    #[error("invalid insteon address: {0}")]
    InvalidAddress(String),
}

/// Errors raised by the modem transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Write attempted after the port went away.
    #[error("transport not connected")]
    NotConnected,

    /// The writer task dropped its receiving end.
    #[error("outgoing channel closed")]
    ChannelClosed,

    /// Wrapper around IO errors from the serial port.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial port could not be opened.
    #[error("failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },
}
