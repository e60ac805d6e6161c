//! Incremental framer for the PLM serial stream.
//!
//! The modem emits frames as:
//!
//!   `0x02 <command> <payload...>`
//!
//! where the payload length is implied by the command. This module accumulates
//! arbitrary chunks and yields whole frames when available. Bytes that cannot
//! start a frame (noise, a bare `0x15` busy NACK, unknown commands) are dropped one
//! at a time until the stream resynchronizes on the next `0x02`.
use bytes::{Buf, BytesMut};
use log::trace;

use crate::insteon::msg::{self, Msg};
use crate::logutil::hex_snippet;

pub struct MsgFramer {
    buf: BytesMut,
    dropped: u64,
}

impl MsgFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            dropped: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes discarded while resynchronizing.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Attempt to extract the next complete frame.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let first = *self.buf.first()?;
            if first != msg::START {
                if first == msg::NACK {
                    trace!("modem busy (bare NACK)");
                }
                self.drop_byte();
                continue;
            }
            match msg::inbound_frame_len(&self.buf) {
                // need the command byte
                None if self.buf.len() < 2 => return None,
                None => {
                    trace!("unknown command 0x{:02X}, resyncing", self.buf[1]);
                    self.drop_byte();
                }
                // need more header bytes to size the frame
                Some(None) => return None,
                Some(Some(len)) => {
                    if self.buf.len() < len {
                        return None;
                    }
                    return Some(self.buf.split_to(len).to_vec());
                }
            }
        }
    }

    /// Like [`next_frame`](Self::next_frame) but parsed into a [`Msg`]; frames that
    /// fail to parse are skipped.
    pub fn next_msg(&mut self) -> Option<Msg> {
        while let Some(frame) = self.next_frame() {
            match Msg::from_bytes(&frame) {
                Ok(m) => return Some(m),
                Err(e) => trace!("dropping frame [{}]: {}", hex_snippet(&frame, 32), e),
            }
        }
        None
    }

    fn drop_byte(&mut self) {
        self.buf.advance(1);
        self.dropped += 1;
    }
}

impl Default for MsgFramer {
    fn default() -> Self {
        Self::new()
    }
}
