//! Outbox operations: pending records, acknowledgements, watermark.

use crate::error::StoreResult;
use crate::row::SyncStatus;
use crate::store::LocalStore;
use crate::tables::{row_key, OutboxEntry, Rejection};
use serde::Serialize;
use std::collections::BTreeSet;
use tillsync_protocol::{DeviceId, EntityId, LogRecord, RecordId, Timestamp};
use tracing::{debug, warn};

/// Counters over the outbox and the entity rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    /// Records ever captured.
    pub total_records: usize,
    /// Records still waiting to be pushed.
    pub pending: usize,
    /// Records acknowledged or superseded.
    pub processed: usize,
    /// Records the remote refused.
    pub rejected: usize,
    /// Entity rows, deleted or not.
    pub rows: usize,
    /// Soft-deleted rows.
    pub deleted_rows: usize,
    /// Rows holding unconfirmed local content.
    pub not_synced_rows: usize,
    /// Rows flagged as conflicting.
    pub conflicted_rows: usize,
    /// Last applied remote position.
    pub watermark: u64,
}

impl LocalStore {
    /// Appends records to the outbox in one commit.
    ///
    /// Records already present are skipped. Returns how many were new.
    pub fn append(&self, records: Vec<LogRecord>) -> StoreResult<usize> {
        self.commit_with(|batch| {
            let before = batch.len();
            for record in records {
                batch.append_record(record);
            }
            Ok(batch.len() - before)
        })
    }

    /// Returns up to `limit` pending records of `device_id` created after
    /// `mark`, oldest first.
    ///
    /// Pending means neither processed nor rejected.
    pub fn pending_since(
        &self,
        device_id: &DeviceId,
        mark: Timestamp,
        limit: usize,
    ) -> Vec<LogRecord> {
        self.read_tables(|tables| {
            let mut pending: Vec<&LogRecord> = tables
                .entries
                .iter()
                .filter(|e| tables.is_pending(e))
                .map(|e| &e.record)
                .filter(|r| r.device_id == *device_id && r.created_at > mark)
                .collect();
            pending.sort_by_key(|r| r.created_at);
            pending.into_iter().take(limit).cloned().collect()
        })
    }

    /// Returns the number of pending records.
    pub fn pending_count(&self) -> usize {
        self.read_tables(|tables| {
            tables
                .entries
                .iter()
                .filter(|e| tables.is_pending(e))
                .count()
        })
    }

    /// Marks records processed. Unknown or already processed IDs are
    /// ignored; returns how many changed.
    pub fn mark_processed(&self, ids: &[RecordId], at: Timestamp) -> StoreResult<usize> {
        self.commit_with(|batch| {
            Ok(ids
                .iter()
                .filter(|id| batch.mark_processed(**id, at))
                .count())
        })
    }

    /// Marks records processed and confirms their entities.
    ///
    /// An entity becomes `Synced` only once none of its records are pending
    /// any more; a later local edit still waiting to be pushed keeps it
    /// `NotSynced`.
    pub fn acknowledge(&self, ids: &[RecordId], at: Timestamp) -> StoreResult<usize> {
        self.commit_with(|batch| {
            let mut touched = BTreeSet::new();
            let mut changed = 0;
            for id in ids {
                let Some(entry) = batch.entry(id) else {
                    warn!(record = %id, "acknowledged record is not in the outbox");
                    continue;
                };
                if batch.mark_processed(*id, at) {
                    changed += 1;
                }
                touched.insert(row_key(&entry.record.entity_type, &entry.record.entity_id));
            }
            for (entity_type, entity_id) in touched {
                batch.confirm_if_settled(&entity_type, &entity_id, at);
            }
            Ok(changed)
        })
    }

    /// Flags a record as rejected by the remote; it is never pushed again.
    ///
    /// Returns false if the record is unknown or already rejected.
    pub fn mark_rejected(
        &self,
        id: RecordId,
        reason: impl Into<String>,
        at: Timestamp,
    ) -> StoreResult<bool> {
        let reason = reason.into();
        self.commit_with(|batch| {
            let Some(entry) = batch.entry(&id) else {
                return Ok(false);
            };
            Ok(batch.mark_rejected(Rejection {
                record_id: id,
                entity_type: entry.record.entity_type,
                entity_id: entry.record.entity_id,
                reason,
                rejected_at: at,
            }))
        })
    }

    /// Marks an entity as conflicting after the remote reported a newer
    /// version of it.
    pub fn flag_conflict(&self, entity_type: &str, entity_id: &EntityId) -> StoreResult<bool> {
        self.commit_with(|batch| {
            let Some(mut row) = batch.row(entity_type, entity_id) else {
                return Ok(false);
            };
            if row.sync.sync_status == SyncStatus::Conflict {
                return Ok(false);
            }
            row.sync.sync_status = SyncStatus::Conflict;
            batch.put_row(row);
            debug!(entity_type, entity = %entity_id, "entity flagged as conflicting");
            Ok(true)
        })
    }

    /// Lists rejected records, oldest rejection first.
    pub fn rejected(&self) -> Vec<Rejection> {
        let mut list: Vec<Rejection> =
            self.read_tables(|tables| tables.rejected.values().cloned().collect());
        list.sort_by_key(|r| (r.rejected_at, r.record_id));
        list
    }

    /// Returns the last applied remote position.
    pub fn latest_remote_watermark(&self) -> u64 {
        self.read_tables(|tables| tables.watermark)
    }

    /// Moves the watermark forward. Returns false if `value` is not ahead.
    pub fn advance_watermark(&self, value: u64) -> StoreResult<bool> {
        self.commit_with(|batch| Ok(batch.advance_watermark(value)))
    }

    /// Returns one outbox entry.
    pub fn record(&self, id: &RecordId) -> Option<OutboxEntry> {
        self.read_tables(|tables| tables.entry(id).cloned())
    }

    /// Returns every outbox entry in capture order.
    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.read_tables(|tables| tables.entries.clone())
    }

    /// Returns outbox and row counters.
    pub fn stats(&self) -> OutboxStats {
        self.read_tables(|tables| {
            let mut stats = OutboxStats {
                total_records: tables.entries.len(),
                rejected: tables.rejected.len(),
                rows: tables.rows.len(),
                watermark: tables.watermark,
                ..OutboxStats::default()
            };
            for entry in &tables.entries {
                if entry.processed {
                    stats.processed += 1;
                } else if !tables.is_rejected(&entry.record.id) {
                    stats.pending += 1;
                }
            }
            for row in tables.rows.values() {
                if row.sync.is_deleted {
                    stats.deleted_rows += 1;
                }
                match row.sync.sync_status {
                    SyncStatus::NotSynced => stats.not_synced_rows += 1,
                    SyncStatus::Conflict => stats.conflicted_rows += 1,
                    SyncStatus::Synced => {}
                }
            }
            stats
        })
    }
}
