mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use insteon_linkdb::database::{DatabaseTarget, ModemDBRecord, Record};
use insteon_linkdb::device::{DatabaseEvent, InsteonModem, ProductData};
use insteon_linkdb::insteon::InsteonAddress;

const SWITCH: InsteonAddress = InsteonAddress::new(0x1A, 0x2B, 0x3C);
const KEYPAD: InsteonAddress = InsteonAddress::new(0x22, 0x33, 0x44);

fn modem_table() -> Vec<[u8; 8]> {
    vec![
        record_bytes(0xE2, 0x01, SWITCH, [0x01, 0x20, 0x45]),
        record_bytes(0xA2, 0x01, SWITCH, [0x01, 0x20, 0x45]),
        record_bytes(0xA2, 0x03, KEYPAD, [0x01, 0x42, 0x41]),
    ]
}

#[tokio::test]
async fn enumeration_builds_entries() {
    let state = FakeState {
        modem_records: modem_table(),
        ..Default::default()
    };
    let h = harness(state);
    let modem = Arc::new(InsteonModem::new(MODEM));
    let mut rx = modem.subscribe();
    h.manager.read(DatabaseTarget::Modem(modem.clone()), Duration::ZERO);

    assert_eq!(next_event(&mut rx).await, DatabaseEvent::ModemDbCompleted { records: 3 });
    {
        let db = modem.db();
        assert!(db.is_complete());
        assert_eq!(db.entries().len(), 2);
        let switch = db.entry(SWITCH).unwrap();
        assert!(switch.controller_groups().contains(&0x01));
        assert!(switch.responder_groups().contains(&0x01));
        assert_eq!(switch.product_data(), Some(ProductData::new(0x01, 0x20, 0x45)));
        assert_eq!(db.related_devices(0x01), vec![SWITCH]);
        assert_eq!(db.controller_groups(KEYPAD).len(), 0);
        assert!(db.responder_groups(KEYPAD).contains(&0x03));
    }
    let state = h.state.lock().unwrap();
    assert_eq!(state.count(0x69, None), 1);
    // one get-next per record, the last one is NACKed
    assert_eq!(state.count(0x6A, None), 3);
}

#[tokio::test]
async fn empty_table_completes() {
    let h = harness(FakeState::default());
    let modem = Arc::new(InsteonModem::new(MODEM));
    let mut rx = modem.subscribe();
    h.manager.read(DatabaseTarget::Modem(modem.clone()), Duration::ZERO);

    assert_eq!(next_event(&mut rx).await, DatabaseEvent::ModemDbCompleted { records: 0 });
    assert!(modem.db().entries().is_empty());
}

#[tokio::test]
async fn manage_writes_apply_each_acked_change() {
    let h = harness(FakeState::default());
    let modem = Arc::new(InsteonModem::new(MODEM));
    let existing = ModemDBRecord::create(SWITCH, 0x01, true, [0x01, 0x20, 0x45]);
    {
        let mut db = modem.db();
        db.load_records([existing]);
        db.mark_record_for_add(KEYPAD, 0x05, false, [0x01, 0x42, 0x41]);
        db.mark_record_for_delete(&existing);
    }
    let mut rx = modem.subscribe();
    h.manager.write(DatabaseTarget::Modem(modem.clone()), Duration::ZERO);

    assert_eq!(
        next_event(&mut rx).await,
        DatabaseEvent::ModemLinkUpdated {
            address: KEYPAD,
            group: 0x05,
            is_controller: false
        }
    );
    assert_eq!(
        next_event(&mut rx).await,
        DatabaseEvent::ModemLinkUpdated {
            address: SWITCH,
            group: 0x01,
            is_controller: true
        }
    );
    assert_eq!(next_event(&mut rx).await, DatabaseEvent::ModemDbUpdated);

    let db = modem.db();
    assert!(!db.has_changes());
    assert!(!db.has_entry(SWITCH));
    assert!(db.record(KEYPAD, 0x05, false).is_some());

    let state = h.state.lock().unwrap();
    let codes: Vec<u8> = state
        .sent
        .iter()
        .filter(|m| m.command() == 0x6F)
        .map(|m| m.get_byte("controlCode").unwrap())
        .collect();
    assert_eq!(codes, vec![0x41, 0x80]);
}

#[tokio::test]
async fn rejected_manage_stays_pending() {
    let state = FakeState {
        nack_manage: true,
        ..Default::default()
    };
    let h = harness(state);
    let modem = Arc::new(InsteonModem::new(MODEM));
    modem
        .db()
        .mark_record_for_add(KEYPAD, 0x05, true, [0x00, 0x00, 0x00]);
    let mut rx = modem.subscribe();
    h.manager.write(DatabaseTarget::Modem(modem.clone()), Duration::ZERO);

    assert_eq!(next_event(&mut rx).await, DatabaseEvent::ModemDbUpdated);
    let db = modem.db();
    assert_eq!(db.record_count(), 0);
    let pending = db.changes();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].target().address(), KEYPAD);
    assert_eq!(h.state.lock().unwrap().count(0x6F, None), 1);
}

#[tokio::test]
async fn last_pending_change_per_link_wins() {
    let h = harness(FakeState::default());
    let modem = Arc::new(InsteonModem::new(MODEM));
    {
        let mut db = modem.db();
        db.mark_record_for_add(KEYPAD, 0x02, true, [0x01, 0x00, 0x00]);
        db.mark_record_for_add(KEYPAD, 0x02, true, [0x02, 0x00, 0x00]);
        assert_eq!(db.changes().len(), 1);
    }
    let mut rx = modem.subscribe();
    h.manager.write(DatabaseTarget::Modem(modem.clone()), Duration::ZERO);
    next_event(&mut rx).await;
    next_event(&mut rx).await;

    let record = modem.db().record(KEYPAD, 0x02, true).unwrap();
    assert_eq!(record.data(), [0x02, 0x00, 0x00]);
    assert_eq!(h.state.lock().unwrap().count(0x6F, None), 1);
}
