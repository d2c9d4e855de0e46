//! In-memory tables rebuilt from the journal, and staged batches.

use crate::row::{EntityRow, SyncStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tillsync_protocol::{EntityId, LogRecord, RecordId, Timestamp};

pub(crate) type RowKey = (String, EntityId);

pub(crate) fn row_key(entity_type: &str, entity_id: &EntityId) -> RowKey {
    (entity_type.to_string(), entity_id.clone())
}

/// One change to the local tables, as written to the journal.
///
/// Applying a mutation is idempotent, so replaying a journal twice or
/// re-applying a batch after a crash yields the same tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Insert or replace an entity row.
    PutRow(EntityRow),
    /// Append a record to the outbox; ignored if the ID is already present.
    AppendRecord(LogRecord),
    /// Flip a record's processed flag to true.
    MarkProcessed {
        /// The record.
        id: RecordId,
        /// Acknowledgement time.
        at: Timestamp,
    },
    /// Record a remote rejection in the side table.
    MarkRejected(Rejection),
    /// Move the pull watermark forward; never backwards.
    AdvanceWatermark(u64),
}

/// An outbox record with its delivery flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// The immutable record.
    pub record: LogRecord,
    /// True once the remote acknowledged it (or it lost a conflict).
    pub processed: bool,
    /// When it was processed.
    pub processed_at: Option<Timestamp>,
}

/// A record the remote refused, kept for manual investigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Rejected record.
    pub record_id: RecordId,
    /// Entity kind of the record.
    pub entity_type: String,
    /// Entity the record targets.
    pub entity_id: EntityId,
    /// Reason given by the remote.
    pub reason: String,
    /// When the rejection was recorded.
    pub rejected_at: Timestamp,
}

#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) rows: BTreeMap<RowKey, EntityRow>,
    pub(crate) entries: Vec<OutboxEntry>,
    index: HashMap<RecordId, usize>,
    by_entity: HashMap<RowKey, Vec<usize>>,
    pub(crate) rejected: HashMap<RecordId, Rejection>,
    pub(crate) watermark: u64,
    pub(crate) high_clock: Timestamp,
}

impl Tables {
    pub(crate) fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::PutRow(row) => {
                self.high_clock = self.high_clock.max(row.version.created_at);
                self.rows
                    .insert(row_key(&row.entity_type, &row.entity_id), row.clone());
            }
            Mutation::AppendRecord(record) => {
                if self.index.contains_key(&record.id) {
                    return;
                }
                self.high_clock = self.high_clock.max(record.created_at);
                let pos = self.entries.len();
                self.index.insert(record.id, pos);
                self.by_entity
                    .entry(row_key(&record.entity_type, &record.entity_id))
                    .or_default()
                    .push(pos);
                self.entries.push(OutboxEntry {
                    record: record.clone(),
                    processed: false,
                    processed_at: None,
                });
            }
            Mutation::MarkProcessed { id, at } => {
                if let Some(&pos) = self.index.get(id) {
                    let entry = &mut self.entries[pos];
                    if !entry.processed {
                        entry.processed = true;
                        entry.processed_at = Some(*at);
                    }
                }
            }
            Mutation::MarkRejected(rejection) => {
                self.rejected
                    .entry(rejection.record_id)
                    .or_insert_with(|| rejection.clone());
            }
            Mutation::AdvanceWatermark(value) => {
                self.watermark = self.watermark.max(*value);
            }
        }
    }

    pub(crate) fn row(&self, entity_type: &str, entity_id: &EntityId) -> Option<&EntityRow> {
        self.rows.get(&row_key(entity_type, entity_id))
    }

    pub(crate) fn entry(&self, id: &RecordId) -> Option<&OutboxEntry> {
        self.index.get(id).map(|&pos| &self.entries[pos])
    }

    pub(crate) fn is_rejected(&self, id: &RecordId) -> bool {
        self.rejected.contains_key(id)
    }

    /// Unprocessed and not rejected.
    pub(crate) fn is_pending(&self, entry: &OutboxEntry) -> bool {
        !entry.processed && !self.is_rejected(&entry.record.id)
    }

    pub(crate) fn entity_entries(&self, key: &RowKey) -> impl Iterator<Item = &OutboxEntry> {
        self.by_entity
            .get(key)
            .into_iter()
            .flatten()
            .map(|&pos| &self.entries[pos])
    }
}

/// A batch of mutations being built against a consistent view of the store.
///
/// Reads see the committed tables with the batch's own mutations layered
/// on top, so several records for the same entity can be applied in one
/// batch. Nothing is visible to other readers until the batch commits as a
/// single journal frame.
pub struct StagedBatch<'a> {
    base: &'a Tables,
    rows: HashMap<RowKey, EntityRow>,
    appended: Vec<LogRecord>,
    processed: HashSet<RecordId>,
    rejected: HashSet<RecordId>,
    watermark: u64,
    mutations: Vec<Mutation>,
}

impl<'a> StagedBatch<'a> {
    pub(crate) fn new(base: &'a Tables) -> Self {
        Self {
            base,
            rows: HashMap::new(),
            appended: Vec::new(),
            processed: HashSet::new(),
            rejected: HashSet::new(),
            watermark: base.watermark,
            mutations: Vec::new(),
        }
    }

    /// Returns the current row for an entity, including deleted rows.
    pub fn row(&self, entity_type: &str, entity_id: &EntityId) -> Option<EntityRow> {
        let key = row_key(entity_type, entity_id);
        self.rows
            .get(&key)
            .or_else(|| self.base.rows.get(&key))
            .cloned()
    }

    /// Returns the outbox entry for a record.
    pub fn entry(&self, id: &RecordId) -> Option<OutboxEntry> {
        let staged = self.processed.contains(id);
        if let Some(entry) = self.base.entry(id) {
            let mut entry = entry.clone();
            if staged && !entry.processed {
                entry.processed = true;
            }
            return Some(entry);
        }
        self.appended
            .iter()
            .find(|r| r.id == *id)
            .map(|record| OutboxEntry {
                record: record.clone(),
                processed: staged,
                processed_at: None,
            })
    }

    fn is_pending(&self, record: &LogRecord) -> bool {
        !self.processed.contains(&record.id)
            && !self.rejected.contains(&record.id)
            && !self.base.is_rejected(&record.id)
    }

    /// Returns the unprocessed, unrejected records of an entity in
    /// `created_at` order.
    pub fn pending_records(&self, entity_type: &str, entity_id: &EntityId) -> Vec<LogRecord> {
        let key = row_key(entity_type, entity_id);
        let mut records: Vec<LogRecord> = self
            .base
            .entity_entries(&key)
            .filter(|e| !e.processed)
            .map(|e| &e.record)
            .chain(
                self.appended
                    .iter()
                    .filter(|r| r.entity_type == entity_type && r.entity_id == *entity_id),
            )
            .filter(|r| self.is_pending(r))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Returns the pull watermark including staged advances.
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Inserts or replaces a row.
    pub fn put_row(&mut self, row: EntityRow) {
        self.rows
            .insert(row_key(&row.entity_type, &row.entity_id), row.clone());
        self.mutations.push(Mutation::PutRow(row));
    }

    /// Appends a record to the outbox.
    pub fn append_record(&mut self, record: LogRecord) {
        if self.base.entry(&record.id).is_some() || self.appended.iter().any(|r| r.id == record.id)
        {
            return;
        }
        self.appended.push(record.clone());
        self.mutations.push(Mutation::AppendRecord(record));
    }

    /// Marks a record processed. Returns false if it is unknown or already
    /// processed.
    pub fn mark_processed(&mut self, id: RecordId, at: Timestamp) -> bool {
        let known_unprocessed = match self.base.entry(&id) {
            Some(entry) => !entry.processed,
            None => self.appended.iter().any(|r| r.id == id),
        };
        if !known_unprocessed || !self.processed.insert(id) {
            return false;
        }
        self.mutations.push(Mutation::MarkProcessed { id, at });
        true
    }

    /// Records a rejection. Returns false if the record was already rejected.
    pub fn mark_rejected(&mut self, rejection: Rejection) -> bool {
        if self.base.is_rejected(&rejection.record_id)
            || !self.rejected.insert(rejection.record_id)
        {
            return false;
        }
        self.mutations.push(Mutation::MarkRejected(rejection));
        true
    }

    /// Advances the watermark. Returns false if `value` is not ahead.
    pub fn advance_watermark(&mut self, value: u64) -> bool {
        if value <= self.watermark {
            return false;
        }
        self.watermark = value;
        self.mutations.push(Mutation::AdvanceWatermark(value));
        true
    }

    /// Sets an entity `Synced` as of `at` if none of its records are left
    /// to push. Returns true if the row changed.
    pub fn confirm_if_settled(
        &mut self,
        entity_type: &str,
        entity_id: &EntityId,
        at: Timestamp,
    ) -> bool {
        if !self.pending_records(entity_type, entity_id).is_empty() {
            return false;
        }
        match self.row(entity_type, entity_id) {
            Some(mut row) if row.sync.sync_status != SyncStatus::Synced => {
                row.sync.sync_status = SyncStatus::Synced;
                row.sync.server_synced_at = Some(at);
                self.put_row(row);
                true
            }
            _ => false,
        }
    }

    /// Returns the number of staged mutations.
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Returns true if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub(crate) fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::SyncState;
    use tillsync_protocol::{DeviceId, Operation, Version};

    fn record(entity: &str, at: u64) -> LogRecord {
        LogRecord::new(
            Operation::Update,
            "product",
            EntityId::new(entity),
            b"{}".to_vec(),
            DeviceId::new("till-1"),
            Timestamp::from_millis(at),
        )
    }

    fn row(entity: &str, at: u64) -> EntityRow {
        EntityRow {
            entity_type: "product".into(),
            entity_id: EntityId::new(entity),
            payload: b"{}".to_vec(),
            version: Version::new(Timestamp::from_millis(at), DeviceId::new("till-1")),
            sync: SyncState::local(DeviceId::new("till-1")),
        }
    }

    #[test]
    fn apply_is_idempotent() {
        let r = record("a", 5);
        let batch = vec![
            Mutation::PutRow(row("a", 5)),
            Mutation::AppendRecord(r.clone()),
            Mutation::MarkProcessed {
                id: r.id,
                at: Timestamp::from_millis(6),
            },
            Mutation::AdvanceWatermark(3),
        ];

        let mut tables = Tables::default();
        for m in batch.iter().chain(batch.iter()) {
            tables.apply(m);
        }

        assert_eq!(tables.entries.len(), 1);
        assert_eq!(tables.rows.len(), 1);
        assert_eq!(tables.watermark, 3);
        assert_eq!(tables.high_clock.as_millis(), 5);
        assert_eq!(
            tables.entry(&r.id).unwrap().processed_at,
            Some(Timestamp::from_millis(6))
        );
    }

    #[test]
    fn watermark_never_moves_back() {
        let mut tables = Tables::default();
        tables.apply(&Mutation::AdvanceWatermark(10));
        tables.apply(&Mutation::AdvanceWatermark(4));
        assert_eq!(tables.watermark, 10);
    }

    #[test]
    fn staged_reads_see_staged_writes() {
        let mut tables = Tables::default();
        let committed = record("a", 1);
        tables.apply(&Mutation::AppendRecord(committed.clone()));

        let mut staged = StagedBatch::new(&tables);
        let fresh = record("a", 2);
        staged.append_record(fresh.clone());
        assert_eq!(staged.pending_records("product", &EntityId::new("a")).len(), 2);

        assert!(staged.mark_processed(committed.id, Timestamp::from_millis(3)));
        assert!(!staged.mark_processed(committed.id, Timestamp::from_millis(3)));
        let pending = staged.pending_records("product", &EntityId::new("a"));
        assert_eq!(pending, vec![fresh.clone()]);

        staged.put_row(row("a", 2));
        assert_eq!(
            staged.row("product", &EntityId::new("a")).unwrap().version.created_at,
            Timestamp::from_millis(2)
        );
        assert!(tables.row("product", &EntityId::new("a")).is_none());
        assert!(!staged.advance_watermark(0));
        assert_eq!(staged.len(), 3);
    }

    #[test]
    fn rejected_records_are_not_pending() {
        let mut tables = Tables::default();
        let r = record("b", 1);
        tables.apply(&Mutation::AppendRecord(r.clone()));

        let mut staged = StagedBatch::new(&tables);
        assert!(staged.mark_rejected(Rejection {
            record_id: r.id,
            entity_type: "product".into(),
            entity_id: EntityId::new("b"),
            reason: "bad".into(),
            rejected_at: Timestamp::from_millis(2),
        }));
        assert!(staged.pending_records("product", &EntityId::new("b")).is_empty());
    }
}
