mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use insteon_linkdb::database::{DatabaseStatus, DatabaseTarget, Record};
use insteon_linkdb::device::{DatabaseEvent, InsteonDevice, InsteonEngine};
use insteon_linkdb::insteon::InsteonAddress;

const DEV: InsteonAddress = InsteonAddress::new(0x1A, 0x2B, 0x3C);
const PEER: InsteonAddress = InsteonAddress::new(0x22, 0x33, 0x44);

fn three_record_table() -> FakeDevice {
    FakeDevice::with_records(
        0x0FFF,
        &[
            record_bytes(0xE2, 0x01, PEER, [0xFF, 0x1F, 0x01]),
            record_bytes(0xA2, 0x02, PEER, [0x00, 0x00, 0x00]),
            hwm(),
        ],
    )
}

async fn read_device(state: FakeState, engine: InsteonEngine) -> (Arc<InsteonDevice>, DatabaseEvent, Harness) {
    let h = harness(state);
    let device = Arc::new(InsteonDevice::new(DEV, engine));
    let mut rx = device.subscribe();
    h.manager.read(DatabaseTarget::Device(device.clone()), Duration::ZERO);
    let event = next_event(&mut rx).await;
    (device, event, h)
}

#[tokio::test]
async fn standard_read_builds_complete_table() {
    let mut state = FakeState::default();
    state.devices.insert(DEV, three_record_table());
    let (device, event, h) = read_device(state, InsteonEngine::I2CS).await;

    assert_eq!(
        event,
        DatabaseEvent::LinkDbUpdated {
            address: DEV,
            status: DatabaseStatus::Complete
        }
    );
    let db = device.link_db();
    assert_eq!(db.record_count(), 3);
    let first = db.record(0x0FFF).unwrap();
    assert!(first.is_controller() && first.is_active());
    assert_eq!(first.address(), PEER);
    assert_eq!(first.data(), [0xFF, 0x1F, 0x01]);
    assert!(db.record(0x0FEF).unwrap().is_last());
    assert_eq!(h.state.lock().unwrap().count(0x62, Some(0x2F)), 1);
}

#[tokio::test]
async fn bad_checksum_leaves_a_gap_on_i2cs() {
    let mut state = FakeState::default();
    let mut table = three_record_table();
    table.corrupt_location = Some(0x0FF7);
    state.devices.insert(DEV, table);
    let (device, event, _h) = read_device(state, InsteonEngine::I2CS).await;

    assert_eq!(
        event,
        DatabaseEvent::LinkDbUpdated {
            address: DEV,
            status: DatabaseStatus::Partial
        }
    );
    let db = device.link_db();
    assert!(db.record(0x0FF7).is_none());
    assert_eq!(db.record_count(), 2);
}

#[tokio::test]
async fn checksum_is_ignored_before_i2cs() {
    let mut state = FakeState::default();
    let mut table = three_record_table();
    table.corrupt_location = Some(0x0FF7);
    state.devices.insert(DEV, table);
    let (device, event, _h) = read_device(state, InsteonEngine::I2).await;

    assert!(matches!(
        event,
        DatabaseEvent::LinkDbUpdated {
            status: DatabaseStatus::Complete,
            ..
        }
    ));
    assert_eq!(device.link_db().record_count(), 3);
}

#[tokio::test]
async fn peek_read_fetches_each_byte_once() {
    let mut state = FakeState::default();
    state.devices.insert(
        DEV,
        FakeDevice::with_records(0x0FFF, &[record_bytes(0xE2, 0x01, PEER, [0xFF, 0x1F, 0x01]), hwm()]),
    );
    let (device, event, h) = read_device(state, InsteonEngine::I1).await;

    assert!(matches!(
        event,
        DatabaseEvent::LinkDbUpdated {
            status: DatabaseStatus::Complete,
            ..
        }
    ));
    {
        let db = device.link_db();
        assert_eq!(db.record_count(), 2);
        assert_eq!(db.record(0x0FFF).unwrap().group(), 0x01);
    }
    let state = h.state.lock().unwrap();
    // both records live under MSB 0x0F
    assert_eq!(state.count(0x62, Some(0x28)), 1);
    assert_eq!(state.count(0x62, Some(0x2B)), 16);
    assert_eq!(state.count(0x62, Some(0x2F)), 0);
}

#[tokio::test]
async fn complete_read_clears_reload_flag() {
    let mut state = FakeState::default();
    state.devices.insert(DEV, three_record_table());
    let h = harness(state);
    let device = Arc::new(InsteonDevice::new(DEV, InsteonEngine::I2));
    {
        let mut db = device.link_db();
        db.update_database_delta(3);
        db.update_database_delta(4);
        assert!(db.should_refresh());
    }
    let mut rx = device.subscribe();
    h.manager.read(DatabaseTarget::Device(device.clone()), Duration::ZERO);
    next_event(&mut rx).await;

    let db = device.link_db();
    assert!(db.is_complete());
    assert!(!db.should_refresh());
}
