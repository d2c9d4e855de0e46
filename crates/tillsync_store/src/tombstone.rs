//! Soft-delete reconciliation.
//!
//! Deletes never remove rows; they travel as records like any other
//! change. Physical removal is left to housekeeping outside the engine,
//! which may only touch rows this module reports as eligible.

use crate::row::EntityRow;
use crate::store::LocalStore;

impl LocalStore {
    /// Lists every soft-deleted row.
    pub fn tombstones(&self) -> Vec<EntityRow> {
        self.read_tables(|tables| {
            tables
                .rows
                .values()
                .filter(|row| row.sync.is_deleted)
                .cloned()
                .collect()
        })
    }

    /// Lists deleted rows whose delete the remote has confirmed.
    pub fn purge_candidates(&self) -> Vec<EntityRow> {
        self.read_tables(|tables| {
            tables
                .rows
                .values()
                .filter(|row| row.can_purge())
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::capture::ChangeKind;
    use crate::row::SyncStatus;
    use crate::store::LocalStore;
    use tillsync_protocol::{DeviceId, EntityId, Timestamp};

    #[test]
    fn deletes_become_eligible_once_acknowledged() {
        let store = LocalStore::in_memory(DeviceId::new("till-1")).unwrap();
        let id = EntityId::new("c1");
        store
            .write(|txn| txn.track_raw(ChangeKind::Added, "customer", id.clone(), b"{}".to_vec()))
            .unwrap();
        store
            .write(|txn| {
                txn.track_raw(ChangeKind::Deleted, "customer", id.clone(), b"{}".to_vec())
            })
            .unwrap();

        assert_eq!(store.tombstones().len(), 1);
        assert!(store.purge_candidates().is_empty());

        let ids: Vec<_> = store
            .outbox_entries()
            .into_iter()
            .map(|e| e.record.id)
            .collect();
        store.acknowledge(&ids, Timestamp::from_millis(1)).unwrap();

        let eligible = store.purge_candidates();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].sync.sync_status, SyncStatus::Synced);
        // Still present, just not visible.
        assert!(store.get("customer", &id).is_some());
        assert!(store.get_visible("customer", &id).is_none());
    }
}
