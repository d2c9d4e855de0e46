//! Push: shipping outbox records to the remote authority.

use crate::engine::{PassTally, SyncEngine};
use crate::error::SyncResult;
use crate::retry::with_retry;
use crate::shutdown::CancelSignal;
use crate::transport::RemoteAuthority;
use std::collections::{BTreeSet, HashMap, HashSet};
use tillsync_protocol::{
    DevicePriority, EntityId, LogRecord, PushRequest, PushResponse, RecordAck, RecordId,
    RecordOutcome, Timestamp,
};
use tillsync_store::{LocalStore, Rejection, StoreResult, SyncStatus};
use tracing::{debug, warn};

/// What one push response did to the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PushSettled {
    pub(crate) acked: u64,
    pub(crate) conflicted: u64,
    pub(crate) rejected: u64,
    pub(crate) missing: u64,
    /// `created_at` of the last record the remote answered.
    pub(crate) answered_through: Option<Timestamp>,
}

impl<R: RemoteAuthority> SyncEngine<R> {
    /// Pushes pending records in `created_at` order, one batch at a time.
    ///
    /// Records the remote answers with a conflict stay pending, so the scan
    /// moves a cursor forward instead of restarting from the oldest pending
    /// record. The cursor only passes records the remote answered: an
    /// authority with a smaller push cap answers a prefix of the batch and
    /// the rest goes out in the next request.
    pub(crate) async fn push_pending(
        &self,
        cancel: &CancelSignal,
        tally: &mut PassTally,
    ) -> SyncResult<()> {
        let device = self.store().device_id().clone();
        let batch_size = self.config().push_batch_size.max(1) as usize;
        let mut cursor = Timestamp::ZERO;

        loop {
            let records = self.store().pending_since(&device, cursor, batch_size);
            if records.is_empty() {
                break;
            }

            let request = PushRequest::new(device.clone(), records);
            debug!(records = request.records.len(), "pushing batch");

            let remote = self.remote();
            let req = &request;
            let response = with_retry(
                &self.config().retry,
                self.config().timeout,
                cancel,
                "push",
                &mut tally.retries,
                move || remote.push(req),
            )
            .await?;

            let settled = settle_push(
                self.store(),
                &self.config().device_priority,
                &request.records,
                &response,
            )?;
            debug!(
                acked = settled.acked,
                conflicted = settled.conflicted,
                rejected = settled.rejected,
                unanswered = settled.missing,
                "push batch settled"
            );
            tally.pushed += settled.acked;
            tally.conflicted += settled.conflicted;
            tally.rejected += settled.rejected;

            match settled.answered_through {
                Some(through) => cursor = through,
                None => {
                    warn!(
                        records = request.records.len(),
                        "remote answered none of the batch; leaving it for the next pass"
                    );
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Applies a push response to the outbox in one commit.
///
/// - Acked records are marked processed; their entities become `Synced`
///   once nothing else of theirs is pending.
/// - Conflicting records stay pending and flag their entity `Conflict`,
///   unless the entity's current local version supersedes them. Such a
///   record is carried by a newer local record and is marked processed.
/// - Rejected records go to the rejection table and are never resent;
///   their entity keeps its unconfirmed status.
///
/// Records the response does not mention are left pending.
pub(crate) fn settle_push(
    store: &LocalStore,
    priority: &DevicePriority,
    records: &[LogRecord],
    response: &PushResponse,
) -> StoreResult<PushSettled> {
    let outcomes: HashMap<RecordId, &RecordAck> = response
        .outcomes
        .iter()
        .map(|ack| (ack.record_id, ack))
        .collect();

    store.commit_with(|batch| {
        let now = Timestamp::wall_clock();
        let mut settled = PushSettled::default();
        let mut delivered: BTreeSet<(String, EntityId)> = BTreeSet::new();
        let mut refused: HashSet<(String, EntityId)> = HashSet::new();

        for record in records {
            let key = (record.entity_type.clone(), record.entity_id.clone());
            let Some(ack) = outcomes.get(&record.id) else {
                debug!(record = %record.id, "remote returned no outcome for record");
                settled.missing += 1;
                continue;
            };
            settled.answered_through = Some(record.created_at);

            match ack.outcome {
                RecordOutcome::Acked => {
                    batch.mark_processed(record.id, now);
                    delivered.insert(key);
                    settled.acked += 1;
                }
                RecordOutcome::Conflict => {
                    settled.conflicted += 1;
                    let row = batch.row(&record.entity_type, &record.entity_id);
                    let carried = row
                        .as_ref()
                        .is_some_and(|row| row.revision().supersedes(&record.revision(), priority));
                    if carried {
                        batch.mark_processed(record.id, now);
                        delivered.insert(key);
                        debug!(
                            record = %record.id,
                            entity = %record.entity_id,
                            "conflicting record is carried by a newer local version"
                        );
                        continue;
                    }
                    if let Some(mut row) = row {
                        if row.sync.sync_status != SyncStatus::Conflict {
                            row.sync.sync_status = SyncStatus::Conflict;
                            batch.put_row(row);
                        }
                    }
                    debug!(
                        record = %record.id,
                        entity = %record.entity_id,
                        reason = ack.reason.as_deref().unwrap_or(""),
                        "remote reported a conflict"
                    );
                }
                RecordOutcome::Rejected => {
                    let reason = ack
                        .reason
                        .clone()
                        .unwrap_or_else(|| "rejected by remote".to_string());
                    warn!(
                        record = %record.id,
                        entity_type = %record.entity_type,
                        entity = %record.entity_id,
                        reason = %reason,
                        "remote rejected record"
                    );
                    batch.mark_rejected(Rejection {
                        record_id: record.id,
                        entity_type: record.entity_type.clone(),
                        entity_id: record.entity_id.clone(),
                        reason,
                        rejected_at: now,
                    });
                    refused.insert(key);
                    settled.rejected += 1;
                }
            }
        }

        for (entity_type, entity_id) in delivered {
            if !refused.contains(&(entity_type.clone(), entity_id.clone())) {
                batch.confirm_if_settled(&entity_type, &entity_id, now);
            }
        }
        Ok(settled)
    })
}
