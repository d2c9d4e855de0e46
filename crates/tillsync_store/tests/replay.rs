//! Journal replay over arbitrary histories of captures and outbox updates.

use proptest::prelude::*;
use tillsync_protocol::{DeviceId, EntityId, Timestamp};
use tillsync_store::{
    ChangeKind, EntityRow, LocalStore, MemoryBackend, OutboxEntry, Rejection, StoreConfig,
};

#[derive(Debug, Clone)]
enum Step {
    Capture {
        kind: ChangeKind,
        entity: usize,
        total: u32,
    },
    Acknowledge(usize),
    Reject(usize),
    Watermark(u64),
}

fn arb_step() -> impl Strategy<Value = Step> {
    let kind = prop_oneof![
        Just(ChangeKind::Added),
        Just(ChangeKind::Modified),
        Just(ChangeKind::Deleted),
    ];
    prop_oneof![
        4 => (kind, 0..4usize, any::<u32>())
            .prop_map(|(kind, entity, total)| Step::Capture { kind, entity, total }),
        2 => (0..32usize).prop_map(Step::Acknowledge),
        1 => (0..32usize).prop_map(Step::Reject),
        1 => (0..100u64).prop_map(Step::Watermark),
    ]
}

fn open(backend: &MemoryBackend) -> LocalStore {
    LocalStore::with_backend(
        Box::new(backend.clone()),
        DeviceId::new("till-3"),
        StoreConfig::default(),
    )
    .unwrap()
}

fn run(store: &LocalStore, step: &Step) {
    match step {
        Step::Capture {
            kind,
            entity,
            total,
        } => {
            // Edits to deleted rows are refused and leave nothing behind.
            let _ = store.write(|txn| {
                txn.track_raw(
                    *kind,
                    "sale",
                    EntityId::new(format!("s{entity}")),
                    format!(r#"{{"total_cents":{total}}}"#).into_bytes(),
                )
            });
        }
        Step::Acknowledge(pick) => {
            let entries = store.outbox_entries();
            if let Some(entry) = entries.get(pick % entries.len().max(1)) {
                store
                    .acknowledge(&[entry.record.id], Timestamp::from_millis(7))
                    .unwrap();
            }
        }
        Step::Reject(pick) => {
            let entries = store.outbox_entries();
            if let Some(entry) = entries.get(pick % entries.len().max(1)) {
                store
                    .mark_rejected(entry.record.id, "refused", Timestamp::from_millis(9))
                    .unwrap();
            }
        }
        Step::Watermark(value) => {
            store.advance_watermark(*value).unwrap();
        }
    }
}

type State = (Vec<EntityRow>, Vec<OutboxEntry>, Vec<Rejection>, u64, usize);

fn state(store: &LocalStore) -> State {
    (
        store.rows(),
        store.outbox_entries(),
        store.rejected(),
        store.latest_remote_watermark(),
        store.pending_count(),
    )
}

proptest! {
    #[test]
    fn reopened_store_matches_the_live_one(steps in prop::collection::vec(arb_step(), 1..40)) {
        let backend = MemoryBackend::new();
        let live = {
            let store = open(&backend);
            for step in &steps {
                run(&store, step);
            }
            state(&store)
        };

        let reopened = open(&backend);
        prop_assert_eq!(state(&reopened), live);
    }

    #[test]
    fn replaying_twice_is_stable(steps in prop::collection::vec(arb_step(), 1..20)) {
        let backend = MemoryBackend::new();
        {
            let store = open(&backend);
            for step in &steps {
                run(&store, step);
            }
        }

        let first = state(&open(&backend));
        let second = state(&open(&backend));
        prop_assert_eq!(first, second);
    }
}
