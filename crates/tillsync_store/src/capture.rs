//! Change capture: local writes become outbox records in the same commit.

use crate::error::{StoreError, StoreResult};
use crate::row::{EntityRow, SyncState, SyncStatus};
use crate::store::LocalStore;
use crate::tables::{row_key, RowKey, StagedBatch};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tillsync_protocol::{DeviceId, EntityId, LogRecord, Operation, Version};
use tracing::debug;

/// An entity kind the engine can replicate.
///
/// Implementors name their kind, expose their ID, and convert to and from a
/// flat snapshot holding only the fields that synchronize. Snapshots are
/// plain data, so they cannot contain cycles.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use tillsync_protocol::EntityId;
/// use tillsync_store::{SyncState, Synchronizable};
///
/// #[derive(Serialize, Deserialize)]
/// struct ProductSnapshot { name: String, price_cents: i64 }
///
/// struct Product { id: EntityId, name: String, price_cents: i64, sync: Option<SyncState> }
///
/// impl Synchronizable for Product {
///     const ENTITY_TYPE: &'static str = "product";
///     type Snapshot = ProductSnapshot;
///
///     fn id(&self) -> EntityId { self.id.clone() }
///     fn sync_state(&self) -> Option<&SyncState> { self.sync.as_ref() }
///     fn attach_sync_state(&mut self, state: SyncState) { self.sync = Some(state); }
///     fn snapshot(&self) -> ProductSnapshot {
///         ProductSnapshot { name: self.name.clone(), price_cents: self.price_cents }
///     }
///     fn restore(id: EntityId, s: ProductSnapshot) -> Self {
///         Product { id, name: s.name, price_cents: s.price_cents, sync: None }
///     }
/// }
/// ```
pub trait Synchronizable: Sized {
    /// Logical name of the entity kind.
    const ENTITY_TYPE: &'static str;

    /// Flat DTO of the synchronizable fields.
    type Snapshot: Serialize + DeserializeOwned;

    /// Returns the entity's ID.
    fn id(&self) -> EntityId;

    /// Returns the sync state loaded with the entity, if any.
    fn sync_state(&self) -> Option<&SyncState>;

    /// Stores the sync state on a loaded entity.
    fn attach_sync_state(&mut self, state: SyncState);

    /// Returns the device that last wrote the entity.
    fn device_id(&self) -> Option<&DeviceId> {
        self.sync_state().map(|s| &s.device_id)
    }

    /// Takes a snapshot of the synchronizable fields.
    fn snapshot(&self) -> Self::Snapshot;

    /// Rebuilds an entity from its snapshot.
    fn restore(id: EntityId, snapshot: Self::Snapshot) -> Self;
}

/// How an entity changed within one local transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Entity was created.
    Added,
    /// Entity was modified.
    Modified,
    /// Entity was deleted.
    Deleted,
}

impl ChangeKind {
    fn operation(self) -> Operation {
        match self {
            ChangeKind::Added => Operation::Insert,
            ChangeKind::Modified => Operation::Update,
            ChangeKind::Deleted => Operation::Delete,
        }
    }

    /// Folds a later change into an earlier one. `None` means the entity
    /// was created and deleted inside the same transaction. Nothing
    /// follows a delete.
    fn then(self, later: ChangeKind) -> Option<ChangeKind> {
        match (self, later) {
            (ChangeKind::Added, ChangeKind::Deleted) => None,
            (ChangeKind::Added, _) => Some(ChangeKind::Added),
            (ChangeKind::Deleted, _) => Some(ChangeKind::Deleted),
            (ChangeKind::Modified, later) => Some(later),
        }
    }
}

#[derive(Debug, Clone)]
struct Change {
    kind: ChangeKind,
    entity_type: String,
    entity_id: EntityId,
    payload: Vec<u8>,
}

/// The set of entity changes made by one unit of local work.
///
/// Each entity appears at most once; repeated changes to the same entity
/// are folded together so the commit produces one record per entity.
#[derive(Debug, Default)]
pub struct LocalTransaction {
    changes: Vec<Option<Change>>,
    index: HashMap<RowKey, usize>,
}

impl LocalTransaction {
    /// Creates an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new entity.
    ///
    /// # Errors
    ///
    /// Returns a capture error if the snapshot cannot be serialized.
    pub fn insert<T: Synchronizable>(&mut self, entity: &T) -> StoreResult<()> {
        self.track_entity(ChangeKind::Added, entity)
    }

    /// Records a modified entity.
    pub fn update<T: Synchronizable>(&mut self, entity: &T) -> StoreResult<()> {
        self.track_entity(ChangeKind::Modified, entity)
    }

    /// Records a deleted entity with its last known state.
    pub fn delete<T: Synchronizable>(&mut self, entity: &T) -> StoreResult<()> {
        self.track_entity(ChangeKind::Deleted, entity)
    }

    fn track_entity<T: Synchronizable>(&mut self, kind: ChangeKind, entity: &T) -> StoreResult<()> {
        let payload = serde_json::to_vec(&entity.snapshot()).map_err(|e| {
            StoreError::capture(format!(
                "cannot serialize {} {}: {e}",
                T::ENTITY_TYPE,
                entity.id()
            ))
        })?;
        self.track_raw(kind, T::ENTITY_TYPE, entity.id(), payload)
    }

    /// Records a change from an already serialized JSON payload.
    ///
    /// # Errors
    ///
    /// Returns a capture error if the ID is blank or a non-delete payload
    /// is not valid JSON.
    pub fn track_raw(
        &mut self,
        kind: ChangeKind,
        entity_type: &str,
        entity_id: EntityId,
        payload: Vec<u8>,
    ) -> StoreResult<()> {
        if entity_id.is_blank() {
            return Err(StoreError::capture(format!(
                "{entity_type} change has a blank entity ID"
            )));
        }
        if kind != ChangeKind::Deleted {
            serde_json::from_slice::<serde_json::Value>(&payload).map_err(|e| {
                StoreError::capture(format!("{entity_type} {entity_id} payload is not JSON: {e}"))
            })?;
        }

        let key = row_key(entity_type, &entity_id);
        let change = Change {
            kind,
            entity_type: entity_type.to_string(),
            entity_id,
            payload,
        };

        match self.index.get(&key).copied() {
            Some(pos) => {
                let folded = match &self.changes[pos] {
                    Some(prev) => prev.kind.then(kind).map(|kind| Change { kind, ..change }),
                    // Created and deleted earlier in this transaction; a
                    // further change starts over as a fresh insert.
                    None => Some(Change {
                        kind: ChangeKind::Added,
                        ..change
                    }),
                };
                self.changes[pos] = folded;
            }
            None => {
                self.index.insert(key, self.changes.len());
                self.changes.push(Some(change));
            }
        }
        Ok(())
    }

    /// Returns the number of entities with a net change.
    pub fn len(&self) -> usize {
        self.changes.iter().flatten().count()
    }

    /// Returns true if there is nothing to commit.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Summary of one captured transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Rows written.
    pub rows: usize,
    /// Outbox records appended.
    pub records: usize,
}

/// Turns a transaction's changes into row writes and outbox records.
pub struct ChangeCapture<'s> {
    store: &'s LocalStore,
}

impl<'s> ChangeCapture<'s> {
    /// Creates a capture for the given store.
    pub fn new(store: &'s LocalStore) -> Self {
        Self { store }
    }

    /// Stages every change of `txn` into `batch`.
    ///
    /// Each captured entity gets its row and exactly one record, stamped by
    /// the device clock inside the writer lock so record order matches
    /// commit order. Excluded entity types get their row only.
    ///
    /// # Errors
    ///
    /// Deletes are terminal: inserting or updating an entity whose row is
    /// already soft-deleted is a capture error.
    pub fn stage(
        &self,
        txn: LocalTransaction,
        batch: &mut StagedBatch<'_>,
    ) -> StoreResult<CaptureSummary> {
        let device = self.store.device_id();
        let mut summary = CaptureSummary::default();

        for change in txn.changes.into_iter().flatten() {
            let created_at = self.store.clock().tick();
            let version = Version::new(created_at, device.clone());
            let excluded = self.store.config().is_excluded(&change.entity_type);

            let mut sync = match batch.row(&change.entity_type, &change.entity_id) {
                Some(existing) if existing.sync.is_deleted && change.kind != ChangeKind::Deleted => {
                    return Err(StoreError::capture(format!(
                        "{} {} is deleted and cannot be modified",
                        change.entity_type, change.entity_id
                    )));
                }
                Some(existing) => SyncState {
                    device_id: device.clone(),
                    sync_status: SyncStatus::NotSynced,
                    ..existing.sync
                },
                None => SyncState::local(device.clone()),
            };
            if change.kind == ChangeKind::Deleted {
                sync.mark_deleted(created_at);
            }
            if excluded {
                // Local-only rows never enter the outbox.
                sync.sync_status = SyncStatus::Synced;
            }

            batch.put_row(EntityRow {
                entity_type: change.entity_type.clone(),
                entity_id: change.entity_id.clone(),
                payload: change.payload.clone(),
                version,
                sync,
            });
            summary.rows += 1;

            if excluded {
                continue;
            }
            batch.append_record(LogRecord::new(
                change.kind.operation(),
                change.entity_type,
                change.entity_id,
                change.payload,
                device.clone(),
                created_at,
            ));
            summary.records += 1;
        }
        Ok(summary)
    }
}

impl LocalStore {
    /// Runs a unit of local work and commits it with its outbox records.
    ///
    /// `work` collects changes into a [`LocalTransaction`]. If it fails, or
    /// any snapshot fails to serialize, nothing is committed. The business
    /// rows and their records land in a single journal frame, so either
    /// both are durable or neither is.
    pub fn write<R>(
        &self,
        work: impl FnOnce(&mut LocalTransaction) -> StoreResult<R>,
    ) -> StoreResult<(R, CaptureSummary)> {
        let mut txn = LocalTransaction::new();
        let value = work(&mut txn)?;
        if txn.is_empty() {
            return Ok((value, CaptureSummary::default()));
        }

        let summary = self.commit_with(|batch| ChangeCapture::new(self).stage(txn, batch))?;
        debug!(
            rows = summary.rows,
            records = summary.records,
            "captured local transaction"
        );
        Ok((value, summary))
    }

    /// Loads a visible entity.
    ///
    /// # Errors
    ///
    /// Returns a capture error if the stored payload no longer matches the
    /// entity's snapshot type.
    pub fn load<T: Synchronizable>(&self, id: &EntityId) -> StoreResult<Option<T>> {
        self.get_visible(T::ENTITY_TYPE, id)
            .map(restore_row::<T>)
            .transpose()
    }

    /// Loads every visible entity of a type.
    pub fn list<T: Synchronizable>(&self) -> StoreResult<Vec<T>> {
        self.list_visible(T::ENTITY_TYPE)
            .into_iter()
            .map(restore_row::<T>)
            .collect()
    }
}

fn restore_row<T: Synchronizable>(row: EntityRow) -> StoreResult<T> {
    let snapshot: T::Snapshot = serde_json::from_slice(&row.payload).map_err(|e| {
        StoreError::capture(format!(
            "stored {} {} does not match its snapshot type: {e}",
            row.entity_type, row.entity_id
        ))
    })?;
    let mut entity = T::restore(row.entity_id, snapshot);
    entity.attach_sync_state(row.sync);
    Ok(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::memory::MemoryBackend;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ProductSnapshot {
        name: String,
        stock: i64,
    }

    #[derive(Debug, Clone)]
    struct Product {
        id: EntityId,
        name: String,
        stock: i64,
        sync: Option<SyncState>,
    }

    impl Product {
        fn new(id: &str, name: &str, stock: i64) -> Self {
            Self {
                id: EntityId::new(id),
                name: name.into(),
                stock,
                sync: None,
            }
        }
    }

    impl Synchronizable for Product {
        const ENTITY_TYPE: &'static str = "product";
        type Snapshot = ProductSnapshot;

        fn id(&self) -> EntityId {
            self.id.clone()
        }
        fn sync_state(&self) -> Option<&SyncState> {
            self.sync.as_ref()
        }
        fn attach_sync_state(&mut self, state: SyncState) {
            self.sync = Some(state);
        }
        fn snapshot(&self) -> ProductSnapshot {
            ProductSnapshot {
                name: self.name.clone(),
                stock: self.stock,
            }
        }
        fn restore(id: EntityId, s: ProductSnapshot) -> Self {
            Self {
                id,
                name: s.name,
                stock: s.stock,
                sync: None,
            }
        }
    }

    fn store() -> LocalStore {
        LocalStore::in_memory(DeviceId::new("till-1")).unwrap()
    }

    #[test]
    fn one_record_per_changed_entity() {
        let store = store();
        let (_, summary) = store
            .write(|txn| {
                txn.insert(&Product::new("p1", "Tea", 10))?;
                txn.insert(&Product::new("p2", "Milk", 3))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(summary, CaptureSummary { rows: 2, records: 2 });

        let tea: Product = store.load(&EntityId::new("p1")).unwrap().unwrap();
        assert_eq!(tea.stock, 10);
        let sync = tea.sync_state().unwrap();
        assert_eq!(sync.sync_status, SyncStatus::NotSynced);
        assert_eq!(tea.device_id(), Some(&DeviceId::new("till-1")));
    }

    #[test]
    fn repeated_changes_fold_into_one_record() {
        let store = store();
        store
            .write(|txn| {
                let mut p = Product::new("p1", "Tea", 10);
                txn.insert(&p)?;
                p.stock = 9;
                txn.update(&p)?;
                Ok(())
            })
            .unwrap();

        let entries = store.outbox_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.operation, Operation::Insert);
        assert_eq!(
            entries[0].record.payload,
            serde_json::to_vec(&ProductSnapshot {
                name: "Tea".into(),
                stock: 9
            })
            .unwrap()
        );
    }

    #[test]
    fn insert_then_delete_in_one_transaction_is_nothing() {
        let store = store();
        let (_, summary) = store
            .write(|txn| {
                let p = Product::new("p1", "Tea", 1);
                txn.insert(&p)?;
                txn.delete(&p)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(summary, CaptureSummary::default());
        assert!(store.rows().is_empty());
        assert_eq!(store.journal_size().unwrap(), 0);
    }

    #[test]
    fn failed_work_commits_nothing() {
        let store = store();
        let result: StoreResult<((), CaptureSummary)> = store.write(|txn| {
            txn.insert(&Product::new("p1", "Tea", 1))?;
            Err(StoreError::capture("price validation failed"))
        });
        assert!(result.is_err());
        assert!(store.rows().is_empty());
        assert!(store.outbox_entries().is_empty());
    }

    #[test]
    fn invalid_raw_payload_fails_capture() {
        let mut txn = LocalTransaction::new();
        let err = txn
            .track_raw(
                ChangeKind::Added,
                "product",
                EntityId::new("p1"),
                b"not json".to_vec(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Capture(_)));
        assert!(txn
            .track_raw(ChangeKind::Added, "product", EntityId::new(" "), b"{}".to_vec())
            .is_err());
        assert!(txn.is_empty());
    }

    #[test]
    fn delete_is_soft_and_captured() {
        let store = store();
        let p = Product::new("p1", "Tea", 1);
        store.write(|txn| txn.insert(&p)).unwrap();
        store.write(|txn| txn.delete(&p)).unwrap();

        assert!(store.load::<Product>(&EntityId::new("p1")).unwrap().is_none());
        let row = store.get("product", &EntityId::new("p1")).unwrap();
        assert!(row.sync.is_deleted);
        assert_eq!(row.sync.deleted_at, Some(row.version.created_at));

        let ops: Vec<Operation> = store
            .outbox_entries()
            .iter()
            .map(|e| e.record.operation)
            .collect();
        assert_eq!(ops, vec![Operation::Insert, Operation::Delete]);
    }

    #[test]
    fn deleted_entities_cannot_be_modified() {
        let store = store();
        let mut p = Product::new("p1", "Tea", 1);
        store.write(|txn| txn.insert(&p)).unwrap();
        store.write(|txn| txn.delete(&p)).unwrap();

        p.stock = 5;
        let err = store.write(|txn| txn.update(&p)).unwrap_err();
        assert!(matches!(err, StoreError::Capture(_)));
        assert_eq!(store.outbox_entries().len(), 2);
    }

    #[test]
    fn excluded_types_are_not_captured() {
        let store = LocalStore::with_backend(
            Box::new(MemoryBackend::new()),
            DeviceId::new("till-1"),
            StoreConfig::new().exclude_entity_type("session"),
        )
        .unwrap();
        let (_, summary) = store
            .write(|txn| {
                txn.track_raw(ChangeKind::Added, "audit_log", EntityId::new("a1"), b"{}".to_vec())?;
                txn.track_raw(ChangeKind::Added, "session", EntityId::new("s1"), b"{}".to_vec())?;
                txn.insert(&Product::new("p1", "Tea", 1))
            })
            .unwrap();
        assert_eq!(summary, CaptureSummary { rows: 3, records: 1 });
        assert_eq!(store.outbox_entries().len(), 1);
    }

    #[test]
    fn record_timestamps_strictly_increase() {
        let store = store();
        for i in 0..20 {
            store
                .write(|txn| txn.insert(&Product::new(&format!("p{i}"), "x", i)))
                .unwrap();
        }
        let stamps: Vec<u64> = store
            .outbox_entries()
            .iter()
            .map(|e| e.record.created_at.as_millis())
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }
}
