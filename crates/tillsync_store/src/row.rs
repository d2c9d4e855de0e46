//! Entity rows and their sync state.

use serde::{Deserialize, Serialize};
use tillsync_protocol::{DeviceId, EntityId, LogRecord, Revision, Timestamp, Version};

/// Whether a row's current content has been confirmed by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Holds a local change the remote has not acknowledged yet.
    NotSynced,
    /// Matches a version the remote has acknowledged or sent.
    Synced,
    /// The remote reported a newer version; resolved on the next pull.
    Conflict,
}

impl SyncStatus {
    /// Returns a short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::NotSynced => "not-synced",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
        }
    }
}

/// Sync bookkeeping carried by every synchronizable row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Device that last wrote this row.
    pub device_id: DeviceId,
    /// Confirmation status.
    pub sync_status: SyncStatus,
    /// When the remote last confirmed this row.
    pub server_synced_at: Option<Timestamp>,
    /// Soft-delete marker.
    pub is_deleted: bool,
    /// When the row was deleted.
    pub deleted_at: Option<Timestamp>,
}

impl SyncState {
    /// State of a row just written locally.
    pub fn local(device_id: DeviceId) -> Self {
        Self {
            device_id,
            sync_status: SyncStatus::NotSynced,
            server_synced_at: None,
            is_deleted: false,
            deleted_at: None,
        }
    }

    /// State of a row taken from the remote.
    pub fn remote(device_id: DeviceId, synced_at: Timestamp) -> Self {
        Self {
            device_id,
            sync_status: SyncStatus::Synced,
            server_synced_at: Some(synced_at),
            is_deleted: false,
            deleted_at: None,
        }
    }

    /// Marks the state deleted at `at`.
    pub fn mark_deleted(&mut self, at: Timestamp) {
        self.is_deleted = true;
        self.deleted_at = Some(at);
    }
}

/// One entity as stored locally.
///
/// Rows are never physically removed by the engine. A deleted row stays
/// with `is_deleted` set, and every read path decides visibility through
/// [`EntityRow::is_visible`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRow {
    /// Logical entity kind.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: EntityId,
    /// JSON snapshot of the entity.
    pub payload: Vec<u8>,
    /// Version of the record whose content this row holds.
    pub version: Version,
    /// Sync bookkeeping.
    pub sync: SyncState,
}

impl EntityRow {
    /// Builds the row a remote record describes, confirmed at `synced_at`.
    ///
    /// A remote delete keeps the record's snapshot and marks the row
    /// deleted as of the record's own timestamp, so every device agrees on
    /// `deleted_at`.
    pub fn from_remote(record: &LogRecord, synced_at: Timestamp) -> Self {
        let mut sync = SyncState::remote(record.device_id.clone(), synced_at);
        if record.operation.is_delete() {
            sync.mark_deleted(record.created_at);
        }
        Self {
            entity_type: record.entity_type.clone(),
            entity_id: record.entity_id.clone(),
            payload: record.payload.clone(),
            version: record.version(),
            sync,
        }
    }

    /// Returns true if the row should be shown to the application.
    pub fn is_visible(&self) -> bool {
        !self.sync.is_deleted
    }

    /// Returns true if the row has unconfirmed local content.
    pub fn is_pending(&self) -> bool {
        self.sync.sync_status != SyncStatus::Synced
    }

    /// Returns true if housekeeping may physically remove the row: it is
    /// deleted and the delete has been confirmed.
    pub fn can_purge(&self) -> bool {
        self.sync.is_deleted && self.sync.sync_status == SyncStatus::Synced
    }

    /// Returns the row's version and delete flag.
    pub fn revision(&self) -> Revision {
        Revision::new(self.version.clone(), self.sync.is_deleted)
    }

    /// Returns the payload parsed as JSON.
    pub fn payload_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.payload)
    }
}
