//! Restart and recovery tests against an on-disk store.

use std::fs::OpenOptions;
use std::io::Write;
use tempfile::tempdir;
use tillsync_protocol::{DeviceId, EntityId, Timestamp};
use tillsync_store::{ChangeKind, LocalStore, StoreConfig, StoreError, SyncStatus};

fn open(path: &std::path::Path) -> LocalStore {
    LocalStore::open(path, DeviceId::new("till-7"), StoreConfig::default()).unwrap()
}

fn capture(store: &LocalStore, id: &str) {
    store
        .write(|txn| {
            txn.track_raw(
                ChangeKind::Added,
                "sale",
                EntityId::new(id),
                br#"{"total_cents":1250}"#.to_vec(),
            )
        })
        .unwrap();
}

#[test]
fn captured_records_survive_restart() {
    let dir = tempdir().unwrap();
    let ids = {
        let store = open(dir.path());
        capture(&store, "s1");
        capture(&store, "s2");
        store
            .outbox_entries()
            .into_iter()
            .map(|e| e.record.id)
            .collect::<Vec<_>>()
    };

    let store = open(dir.path());
    let pending = store.pending_since(store.device_id(), Timestamp::ZERO, 10);
    assert_eq!(pending.iter().map(|r| r.id).collect::<Vec<_>>(), ids);
    assert_eq!(
        store.get("sale", &EntityId::new("s1")).unwrap().sync.sync_status,
        SyncStatus::NotSynced
    );
}

#[test]
fn acknowledgements_survive_restart() {
    let dir = tempdir().unwrap();
    {
        let store = open(dir.path());
        capture(&store, "s1");
        let id = store.outbox_entries()[0].record.id;
        store.acknowledge(&[id], Timestamp::from_millis(1)).unwrap();
        store.advance_watermark(42).unwrap();
    }

    let store = open(dir.path());
    assert_eq!(store.pending_count(), 0);
    assert_eq!(store.latest_remote_watermark(), 42);
    assert_eq!(
        store.get("sale", &EntityId::new("s1")).unwrap().sync.sync_status,
        SyncStatus::Synced
    );
}

#[test]
fn torn_tail_is_dropped_on_open() {
    let dir = tempdir().unwrap();
    let good_size = {
        let store = open(dir.path());
        capture(&store, "s1");
        store.journal_size().unwrap()
    };

    // A crash mid-append leaves half a frame behind.
    let mut file = OpenOptions::new()
        .append(true)
        .open(dir.path().join("outbox.journal"))
        .unwrap();
    file.write_all(b"TSJF\x01\x00\xff\x00\x00\x00partial").unwrap();
    drop(file);

    let store = open(dir.path());
    assert_eq!(store.journal_size().unwrap(), good_size);
    assert_eq!(store.pending_count(), 1);

    // New commits append cleanly after the cut.
    capture(&store, "s2");
    drop(store);
    assert_eq!(open(dir.path()).pending_count(), 2);
}

#[test]
fn corrupted_middle_frame_refuses_to_open() {
    let dir = tempdir().unwrap();
    {
        let store = open(dir.path());
        capture(&store, "s1");
        capture(&store, "s2");
    }

    let path = dir.path().join("outbox.journal");
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[20] ^= 0xff;
    std::fs::write(&path, bytes).unwrap();

    let err = LocalStore::open(dir.path(), DeviceId::new("till-7"), StoreConfig::default())
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        StoreError::ChecksumMismatch { .. } | StoreError::Corrupted(_)
    ));
}

#[test]
fn one_process_per_store() {
    let dir = tempdir().unwrap();
    let _first = open(dir.path());
    let second = LocalStore::open(dir.path(), DeviceId::new("till-7"), StoreConfig::default());
    assert!(matches!(second, Err(StoreError::Locked)));
}
