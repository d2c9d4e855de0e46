//! Tombstones command implementation.

use serde::Serialize;
use tillsync_store::{EntityRow, LocalStore};

/// A soft-deleted row for output.
#[derive(Debug, Serialize)]
pub struct TombstoneInfo {
    /// Entity kind.
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
    /// Device that wrote the delete.
    pub deleted_by: String,
    /// When the entity was deleted, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<u64>,
    /// Sync status of the delete.
    pub sync_status: &'static str,
    /// True once housekeeping may physically remove the row.
    pub purgeable: bool,
}

impl From<&EntityRow> for TombstoneInfo {
    fn from(row: &EntityRow) -> Self {
        Self {
            entity_type: row.entity_type.clone(),
            entity_id: row.entity_id.to_string(),
            deleted_by: row.version.device_id.to_string(),
            deleted_at: row.sync.deleted_at.map(|t| t.as_millis()),
            sync_status: row.sync.sync_status.as_str(),
            purgeable: row.can_purge(),
        }
    }
}

/// Runs the tombstones command.
pub fn run(
    store: &LocalStore,
    purgeable_only: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows = if purgeable_only {
        store.purge_candidates()
    } else {
        store.tombstones()
    };
    let tombstones: Vec<TombstoneInfo> = rows.iter().map(TombstoneInfo::from).collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&tombstones)?);
        }
        _ => {
            println!("Tombstones ({} total)", tombstones.len());
            println!("==========");
            for t in &tombstones {
                println!(
                    "{}/{} deleted by {} [{}]{}",
                    t.entity_type,
                    t.entity_id,
                    t.deleted_by,
                    t.sync_status,
                    if t.purgeable { " purgeable" } else { "" }
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillsync_protocol::{DeviceId, EntityId, Timestamp};
    use tillsync_store::ChangeKind;

    #[test]
    fn confirmed_delete_is_purgeable() {
        let store = LocalStore::in_memory(DeviceId::new("till-1")).unwrap();
        for kind in [ChangeKind::Added, ChangeKind::Deleted] {
            store
                .write(|txn| txn.track_raw(kind, "sale", EntityId::new("s1"), b"{}".to_vec()))
                .unwrap();
        }

        let before = TombstoneInfo::from(&store.tombstones()[0]);
        assert!(!before.purgeable);
        assert_eq!(before.deleted_by, "till-1");

        let ids: Vec<_> = store.outbox_entries().iter().map(|e| e.record.id).collect();
        store.acknowledge(&ids, Timestamp::from_millis(9)).unwrap();

        let after = TombstoneInfo::from(&store.purge_candidates()[0]);
        assert!(after.purgeable);
        assert_eq!(after.sync_status, "synced");
    }
}
