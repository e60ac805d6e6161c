mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use insteon_linkdb::database::{DatabaseCache, DatabaseStatus, DatabaseTarget, LinkDB, ModemDB};
use insteon_linkdb::device::{InsteonDevice, InsteonEngine, InsteonModem, ProductData};
use insteon_linkdb::insteon::InsteonAddress;

const DEV: InsteonAddress = InsteonAddress::new(0x1A, 0x2B, 0x3C);
const PEER: InsteonAddress = InsteonAddress::new(0x22, 0x33, 0x44);

#[tokio::test]
async fn downloaded_tables_survive_a_restart() {
    let mut state = FakeState::default();
    state.devices.insert(
        DEV,
        FakeDevice::with_records(
            0x0FFF,
            &[
                record_bytes(0xE2, 0x01, PEER, [0x03, 0x1F, 0x01]),
                record_bytes(0xA2, 0x01, MODEM, [0xFF, 0x1F, 0x01]),
                hwm(),
            ],
        ),
    );
    state.modem_records = vec![
        record_bytes(0xE2, 0x00, DEV, [0x01, 0x20, 0x45]),
        record_bytes(0xA2, 0x01, DEV, [0x01, 0x20, 0x45]),
    ];
    let h = harness(state);

    let modem = Arc::new(InsteonModem::new(MODEM));
    let device = Arc::new(InsteonDevice::new(DEV, InsteonEngine::I2CS));
    let mut modem_rx = modem.subscribe();
    let mut device_rx = device.subscribe();
    h.manager.read(DatabaseTarget::Modem(modem.clone()), Duration::ZERO);
    h.manager.read(DatabaseTarget::Device(device.clone()), Duration::ZERO);
    next_event(&mut modem_rx).await;
    next_event(&mut device_rx).await;

    let mut cache = DatabaseCache::new();
    cache.capture_modem(&modem.db());
    cache.capture_device(DEV, &device.link_db());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("linkdb_cache.json");
    cache.save_to_file(&path).unwrap();
    let loaded = DatabaseCache::load_from_file(&path).unwrap();

    let mut modem_db = ModemDB::new();
    loaded.restore_modem(&mut modem_db);
    assert!(modem_db.is_complete());
    assert_eq!(modem_db.records(), modem.db().records());
    assert_eq!(
        modem_db.entry(DEV).unwrap().product_data(),
        Some(ProductData::new(0x01, 0x20, 0x45))
    );
    assert!(modem_db.controller_groups(DEV).contains(&0x00));

    let mut link_db = LinkDB::new();
    assert!(loaded.restore_device(DEV, &mut link_db));
    assert_eq!(link_db.status(), DatabaseStatus::Complete);
    assert_eq!(link_db.records(), device.link_db().records());
    assert_eq!(link_db.related_devices().len(), 2);
}

#[test]
fn missing_cache_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(DatabaseCache::load_from_file(dir.path().join("absent.json")).is_err());
}

#[test]
fn saving_twice_replaces_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let mut cache = DatabaseCache::new();
    cache.save_to_file(&path).unwrap();

    let mut db = ModemDB::new();
    db.mark_record_for_add(PEER, 0x01, true, [0; 3]);
    db.modify_or_add_controller_record(PEER, 0x01, [0; 3]);
    db.set_complete(true);
    cache.capture_modem(&db);
    cache.save_to_file(&path).unwrap();

    let loaded = DatabaseCache::load_from_file(&path).unwrap();
    assert!(loaded.modem_complete);
    assert_eq!(loaded.modem_records.len(), 1);
    // only the cache file itself, no leftover temp files
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
