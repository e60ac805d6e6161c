//! Test utilities & fixtures.
//! A scripted PLM that answers host frames the way a modem and its devices would.
#![allow(dead_code)] // each test binary uses a different subset

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use insteon_linkdb::database::{DatabaseManager, DatabaseTuning, PauseFlag};
use insteon_linkdb::insteon::{InsteonAddress, Msg, Transport};

pub const MODEM: InsteonAddress = InsteonAddress::new(0x44, 0x85, 0x11);

/// Link table memory of one fake device.
pub struct FakeDevice {
    pub memory: Vec<u8>,
    msb: u8,
    last_peek: u16,
    /// Location whose next record response carries a wrong checksum.
    pub corrupt_location: Option<u16>,
    /// Requests still answered before the device goes quiet.
    pub replies_left: Option<usize>,
}

impl FakeDevice {
    /// Device whose table holds `records` starting at `first` and growing down.
    pub fn with_records(first: u16, records: &[[u8; 8]]) -> Self {
        let mut device = FakeDevice {
            memory: vec![0; 0x1000],
            msb: 0,
            last_peek: 0,
            corrupt_location: None,
            replies_left: None,
        };
        for (i, record) in records.iter().enumerate() {
            device.write_record(first - 8 * i as u16, record);
        }
        device
    }

    pub fn write_record(&mut self, location: u16, record: &[u8; 8]) {
        let start = usize::from(location - 7);
        self.memory[start..start + 8].copy_from_slice(record);
    }

    pub fn record(&self, location: u16) -> [u8; 8] {
        let start = usize::from(location - 7);
        let mut out = [0u8; 8];
        out.copy_from_slice(&self.memory[start..start + 8]);
        out
    }
}

#[derive(Default)]
pub struct FakeState {
    pub devices: HashMap<InsteonAddress, FakeDevice>,
    pub modem_records: Vec<[u8; 8]>,
    pub modem_cursor: usize,
    /// Every frame the host wrote, in order.
    pub sent: Vec<Msg>,
    /// Swallow everything without answering.
    pub silent: bool,
    /// Reject manage-all-link requests.
    pub nack_manage: bool,
}

impl FakeState {
    pub fn count(&self, command: u8, cmd1: Option<u8>) -> usize {
        self.sent
            .iter()
            .filter(|m| m.command() == command)
            .filter(|m| cmd1.map_or(true, |c| m.get_byte("command1").ok() == Some(c)))
            .count()
    }
}

pub type SharedState = Arc<Mutex<FakeState>>;

pub fn record_bytes(flags: u8, group: u8, address: InsteonAddress, data: [u8; 3]) -> [u8; 8] {
    let a = address.bytes();
    [flags, group, a[0], a[1], a[2], data[0], data[1], data[2]]
}

pub fn hwm() -> [u8; 8] {
    [0; 8]
}

fn standard_from(from: InsteonAddress, flags: u8, cmd1: u8, cmd2: u8) -> Msg {
    let mut msg = Msg::make("StandardMessageReceived").unwrap();
    msg.set_address("fromAddress", from).unwrap();
    msg.set_address("toAddress", MODEM).unwrap();
    msg.set_byte("messageFlags", flags).unwrap();
    msg.set_byte("command1", cmd1).unwrap();
    msg.set_byte("command2", cmd2).unwrap();
    msg
}

/// Direct ACK (flags 001x xxxx) from a device.
pub fn ack_from(from: InsteonAddress, cmd1: u8, cmd2: u8) -> Msg {
    standard_from(from, 0x2B, cmd1, cmd2)
}

pub fn nack_from(from: InsteonAddress, cmd1: u8, cmd2: u8) -> Msg {
    standard_from(from, 0xAB, cmd1, cmd2)
}

/// Extended 0x2F record response for `location`.
pub fn record_response(from: InsteonAddress, location: u16, record: &[u8; 8], corrupt: bool) -> Msg {
    let mut msg = Msg::make("ExtendedMessageReceived").unwrap();
    msg.set_address("fromAddress", from).unwrap();
    msg.set_address("toAddress", MODEM).unwrap();
    msg.set_byte("messageFlags", 0x1B).unwrap();
    msg.set_byte("command1", 0x2F).unwrap();
    msg.set_byte("command2", 0x00).unwrap();
    let [hi, lo] = location.to_be_bytes();
    let mut ud = [0u8; 14];
    ud[1] = 0x01;
    ud[2] = hi;
    ud[3] = lo;
    ud[5..13].copy_from_slice(record);
    msg.set_bytes("userData", &ud).unwrap();
    msg.set_crc();
    if corrupt {
        let mut ud = msg.get_bytes("userData").unwrap().to_vec();
        ud[13] = ud[13].wrapping_add(1);
        msg.set_bytes("userData", &ud).unwrap();
    }
    msg
}

fn modem_record_response(record: &[u8; 8]) -> Msg {
    let mut msg = Msg::make("ALLLinkRecordResponse").unwrap();
    msg.set_byte("recordFlags", record[0]).unwrap();
    msg.set_byte("ALLLinkGroup", record[1]).unwrap();
    msg.set_address("linkAddress", InsteonAddress::new(record[2], record[3], record[4]))
        .unwrap();
    msg.set_bytes("linkData", &record[5..8]).unwrap();
    msg
}

fn answer(state: &mut FakeState, msg: &Msg) -> Vec<Msg> {
    let mut replies = Vec::new();
    match msg.command() {
        0x62 => {
            replies.push(msg.echo(true).unwrap());
            let to = msg.get_address("toAddress").unwrap();
            let Some(device) = state.devices.get_mut(&to) else {
                return replies;
            };
            match device.replies_left {
                Some(0) => return replies,
                Some(n) => device.replies_left = Some(n - 1),
                None => {}
            }
            let cmd1 = msg.get_byte("command1").unwrap();
            let cmd2 = msg.get_byte("command2").unwrap();
            match cmd1 {
                0x28 => {
                    device.msb = cmd2;
                    replies.push(ack_from(to, 0x28, cmd2));
                }
                0x2B => {
                    let address = u16::from_be_bytes([device.msb, cmd2]);
                    device.last_peek = address;
                    replies.push(ack_from(to, 0x2B, device.memory[usize::from(address)]));
                }
                0x29 => {
                    let address = usize::from(device.last_peek);
                    device.memory[address] = cmd2;
                    replies.push(ack_from(to, 0x29, cmd2));
                }
                0x2F if msg.is_extended() => match msg.user_data(2).unwrap() {
                    0x00 => {
                        replies.push(ack_from(to, 0x2F, 0x00));
                        let mut location = 0x0FFFu16;
                        loop {
                            let record = device.record(location);
                            let corrupt = device.corrupt_location == Some(location);
                            if corrupt {
                                device.corrupt_location = None;
                            }
                            replies.push(record_response(to, location, &record, corrupt));
                            if record[0] & 0x02 == 0 || location < 15 {
                                break;
                            }
                            location -= 8;
                        }
                    }
                    0x02 => {
                        let location = msg.user_data_u16(3).unwrap();
                        let mut record = [0u8; 8];
                        for (i, b) in record.iter_mut().enumerate() {
                            *b = msg.user_data(6 + i).unwrap();
                        }
                        device.write_record(location, &record);
                        replies.push(ack_from(to, 0x2F, 0x00));
                    }
                    _ => {}
                },
                _ => {}
            }
        }
        0x69 => {
            state.modem_cursor = 0;
            replies.extend(next_modem_record(state, msg));
        }
        0x6A => replies.extend(next_modem_record(state, msg)),
        0x6F => replies.push(msg.echo(!state.nack_manage).unwrap()),
        _ => {}
    }
    replies
}

fn next_modem_record(state: &mut FakeState, msg: &Msg) -> Vec<Msg> {
    match state.modem_records.get(state.modem_cursor) {
        Some(record) => {
            state.modem_cursor += 1;
            vec![msg.echo(true).unwrap(), modem_record_response(record)]
        }
        None => vec![msg.echo(false).unwrap()],
    }
}

/// Spawn the fake PLM on top of a fresh transport.
pub fn fake_plm(state: SharedState) -> Transport {
    let (transport, mut outgoing) = Transport::new();
    let dispatcher = transport.clone();
    tokio::spawn(async move {
        while let Some(msg) = outgoing.recv().await {
            let replies = {
                let mut guard = state.lock().unwrap();
                guard.sent.push(msg.clone());
                if guard.silent {
                    Vec::new()
                } else {
                    answer(&mut guard, &msg)
                }
            };
            for reply in replies {
                dispatcher.dispatch(reply);
            }
        }
    });
    transport
}

pub struct Harness {
    pub state: SharedState,
    pub transport: Transport,
    pub manager: DatabaseManager,
    pub request_queue: Arc<PauseFlag>,
    pub poller: Arc<PauseFlag>,
}

pub fn harness(state: FakeState) -> Harness {
    harness_with(state, DatabaseTuning::default())
}

pub fn harness_with(state: FakeState, tuning: DatabaseTuning) -> Harness {
    let state = Arc::new(Mutex::new(state));
    let transport = fake_plm(state.clone());
    let request_queue = Arc::new(PauseFlag::new());
    let poller = Arc::new(PauseFlag::new());
    let manager = DatabaseManager::start(tuning, transport.clone(), request_queue.clone(), poller.clone());
    Harness {
        state,
        transport,
        manager,
        request_queue,
        poller,
    }
}

/// Wait for the next event, failing the test instead of hanging.
pub async fn next_event<T: Clone>(rx: &mut tokio::sync::broadcast::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("timed out waiting for database event")
        .expect("event channel closed")
}
