//! Applying pulled records to local state.
//!
//! A page of remote records is applied in one store commit together with
//! the watermark advance, so a crash never leaves records applied without
//! the watermark covering them (or the reverse).
//!
//! For each record:
//!
//! - An echo of one of this device's own records confirms it.
//! - An unknown entity is created from the record.
//! - An entity with nothing left to push takes the record only if it
//!   supersedes the current version. Stale records are dropped, which is
//!   what makes reordered or repeated input converge.
//! - An entity with unpushed local records is a conflict and goes to the
//!   [`ConflictResolver`].

use tillsync_protocol::{
    ConflictResolver, DevicePriority, LogRecord, Operation, PulledRecord, Resolution, Timestamp,
};
use tillsync_store::{EntityRow, LocalStore, StagedBatch, StoreResult, SyncStatus};
use tracing::{debug, info, trace};

/// Counters for one applied page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Records that changed a row.
    pub applied: u64,
    /// Records older than the row they target.
    pub stale: u64,
    /// Records that met unpushed local records.
    pub conflicted: u64,
    /// This device's own records coming back.
    pub echoed: u64,
    /// Records for entity types this device keeps local.
    pub skipped: u64,
}

/// Applies remote records to a [`LocalStore`].
pub struct RemoteApplier<'a> {
    store: &'a LocalStore,
    resolver: &'a dyn ConflictResolver,
    priority: &'a DevicePriority,
}

impl<'a> RemoteApplier<'a> {
    /// Creates an applier. `priority` must be the tie-break ordering the
    /// remote authority uses.
    pub fn new(
        store: &'a LocalStore,
        resolver: &'a dyn ConflictResolver,
        priority: &'a DevicePriority,
    ) -> Self {
        Self {
            store,
            resolver,
            priority,
        }
    }

    /// Applies a page and advances the watermark to cover it, in one
    /// commit.
    pub fn apply_page(&self, records: &[PulledRecord], watermark: u64) -> StoreResult<ApplySummary> {
        self.store.commit_with(|batch| {
            let mut summary = ApplySummary::default();
            let mut high = watermark;

            for pulled in records {
                high = high.max(pulled.sequence);
                let record = &pulled.record;
                self.store.clock().observe(record.created_at);

                if self.store.config().is_excluded(&record.entity_type) {
                    debug!(
                        entity_type = %record.entity_type,
                        record = %record.id,
                        "skipping remote record for a local-only entity type"
                    );
                    summary.skipped += 1;
                    continue;
                }

                let now = Timestamp::wall_clock();
                if record.device_id == *self.store.device_id() && batch.entry(&record.id).is_some()
                {
                    batch.mark_processed(record.id, now);
                    batch.confirm_if_settled(&record.entity_type, &record.entity_id, now);
                    summary.echoed += 1;
                    continue;
                }

                self.apply_record(batch, record, now, &mut summary);
            }

            batch.advance_watermark(high);
            Ok(summary)
        })
    }

    fn apply_record(
        &self,
        batch: &mut StagedBatch<'_>,
        record: &LogRecord,
        now: Timestamp,
        summary: &mut ApplySummary,
    ) {
        let remote = record.revision();
        let Some(row) = batch.row(&record.entity_type, &record.entity_id) else {
            batch.put_row(EntityRow::from_remote(record, now));
            summary.applied += 1;
            return;
        };

        let local = row.revision();
        let pending = batch.pending_records(&record.entity_type, &record.entity_id);
        if pending.is_empty() {
            if remote.supersedes(&local, self.priority) {
                batch.put_row(EntityRow::from_remote(record, now));
                summary.applied += 1;
            } else {
                trace!(
                    entity = %record.entity_id,
                    local = %local.version,
                    remote = %remote.version,
                    "ignoring stale remote record"
                );
                summary.stale += 1;
            }
            return;
        }

        summary.conflicted += 1;
        match self.resolver.resolve(&local, &remote) {
            Resolution::AcceptRemote => {
                for superseded in &pending {
                    batch.mark_processed(superseded.id, now);
                }
                batch.put_row(EntityRow::from_remote(record, now));
                summary.applied += 1;
                info!(
                    entity_type = %record.entity_type,
                    entity = %record.entity_id,
                    local = %local.version,
                    remote = %remote.version,
                    strategy = self.resolver.name(),
                    dropped = pending.len(),
                    "conflict resolved in favour of the remote version"
                );
            }
            Resolution::KeepLocal => {
                // The remote already holds something it orders after our
                // pending version, so resending as-is would conflict again.
                let rebased = remote.supersedes(&local, self.priority);
                let mut carried = 0;
                if rebased {
                    self.rebase(batch, row, &pending, now);
                } else {
                    // Older pending records are carried by the newest local
                    // version and would only conflict again.
                    for older in &pending {
                        if local.supersedes(&older.revision(), self.priority)
                            && batch.mark_processed(older.id, now)
                        {
                            carried += 1;
                        }
                    }
                    batch.confirm_if_settled(&record.entity_type, &record.entity_id, now);
                }
                info!(
                    entity_type = %record.entity_type,
                    entity = %record.entity_id,
                    local = %local.version,
                    remote = %remote.version,
                    strategy = self.resolver.name(),
                    rebased,
                    carried,
                    "conflict resolved in favour of the local version"
                );
            }
        }
    }

    /// Replaces the pending records of a row with one fresh record stamped
    /// after everything this device has observed.
    fn rebase(
        &self,
        batch: &mut StagedBatch<'_>,
        mut row: EntityRow,
        pending: &[LogRecord],
        now: Timestamp,
    ) {
        for superseded in pending {
            batch.mark_processed(superseded.id, now);
        }
        let operation = if row.sync.is_deleted {
            Operation::Delete
        } else {
            Operation::Update
        };
        let record = LogRecord::new(
            operation,
            row.entity_type.clone(),
            row.entity_id.clone(),
            row.payload.clone(),
            self.store.device_id().clone(),
            self.store.clock().tick(),
        );
        row.version = record.version();
        row.sync.device_id = record.device_id.clone();
        row.sync.sync_status = SyncStatus::NotSynced;
        batch.append_record(record);
        batch.put_row(row);
    }
}
