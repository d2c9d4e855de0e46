//! Dump outbox command implementation.

use serde::Serialize;
use tillsync_store::{LocalStore, OutboxEntry};

/// Outbox record representation for output.
#[derive(Debug, Serialize)]
pub struct OutboxRecordInfo {
    /// Record ID.
    pub id: String,
    /// Operation name.
    pub operation: String,
    /// Entity kind.
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
    /// Originating device.
    pub device_id: String,
    /// Device-local timestamp in milliseconds.
    pub created_at: u64,
    /// pending, processed or rejected.
    pub status: &'static str,
    /// When the record was processed (if it was).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<u64>,
    /// Payload size in bytes.
    pub payload_size: usize,
}

/// Runs the dump-outbox command.
pub fn run(
    store: &LocalStore,
    limit: Option<usize>,
    pending_only: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = collect(store, limit, pending_only);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }

    Ok(())
}

/// Gathers outbox records in capture order.
pub fn collect(
    store: &LocalStore,
    limit: Option<usize>,
    pending_only: bool,
) -> Vec<OutboxRecordInfo> {
    let rejected: Vec<_> = store.rejected().into_iter().map(|r| r.record_id).collect();

    store
        .outbox_entries()
        .into_iter()
        .map(|entry| {
            let status = status_of(&entry, rejected.contains(&entry.record.id));
            (entry, status)
        })
        .filter(|(_, status)| !pending_only || *status == "pending")
        .take(limit.unwrap_or(usize::MAX))
        .map(|(entry, status)| OutboxRecordInfo {
            id: entry.record.id.to_string(),
            operation: entry.record.operation.as_str().to_string(),
            entity_type: entry.record.entity_type.clone(),
            entity_id: entry.record.entity_id.to_string(),
            device_id: entry.record.device_id.to_string(),
            created_at: entry.record.created_at.as_millis(),
            status,
            processed_at: entry.processed_at.map(|t| t.as_millis()),
            payload_size: entry.record.payload_size(),
        })
        .collect()
}

fn status_of(entry: &OutboxEntry, rejected: bool) -> &'static str {
    if rejected {
        "rejected"
    } else if entry.processed {
        "processed"
    } else {
        "pending"
    }
}

fn print_text_output(records: &[OutboxRecordInfo]) {
    println!("Outbox Records ({} total)", records.len());
    println!("==============");
    println!();

    for record in records {
        println!(
            "[{:13}] {:9} {:6} {}/{} from {} ({} bytes)",
            record.created_at,
            record.status,
            record.operation,
            record.entity_type,
            record.entity_id,
            record.device_id,
            record.payload_size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillsync_protocol::{DeviceId, EntityId, Timestamp};
    use tillsync_store::ChangeKind;

    fn store_with_three() -> LocalStore {
        let store = LocalStore::in_memory(DeviceId::new("till-1")).unwrap();
        for id in ["s1", "s2", "s3"] {
            store
                .write(|txn| {
                    txn.track_raw(ChangeKind::Added, "sale", EntityId::new(id), b"{}".to_vec())
                })
                .unwrap();
        }
        let entries = store.outbox_entries();
        store
            .acknowledge(&[entries[0].record.id], Timestamp::from_millis(5))
            .unwrap();
        store
            .mark_rejected(entries[1].record.id, "bad", Timestamp::from_millis(6))
            .unwrap();
        store
    }

    #[test]
    fn statuses_follow_the_outbox() {
        let records = collect(&store_with_three(), None, false);
        let statuses: Vec<_> = records.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec!["processed", "rejected", "pending"]);
        assert_eq!(records[0].processed_at, Some(5));
        assert_eq!(records[2].operation, "insert");
    }

    #[test]
    fn pending_filter_and_limit() {
        let store = store_with_three();
        let pending = collect(&store, None, true);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_id, "s3");

        assert_eq!(collect(&store, Some(2), false).len(), 2);
    }
}
