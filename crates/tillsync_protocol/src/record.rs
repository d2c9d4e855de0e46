//! Transaction log records.

use crate::conflict::{Revision, Version};
use crate::ids::{DeviceId, EntityId, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// Kind of mutation a log record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Entity was created.
    Insert,
    /// Entity was modified.
    Update,
    /// Entity was soft-deleted.
    Delete,
}

impl Operation {
    /// Returns true for deletes.
    pub fn is_delete(&self) -> bool {
        matches!(self, Operation::Delete)
    }

    /// Returns a short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            Operation::Insert => 1,
            Operation::Update => 2,
            Operation::Delete => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Operation::Insert),
            2 => Some(Operation::Update),
            3 => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// An immutable record of one mutation to one entity.
///
/// Records are produced by change capture on the originating device and
/// travel unchanged through the outbox, the push batch, the remote log and
/// the pull response. Delivery bookkeeping (processed, rejected) is kept
/// beside the record by whoever stores it, never inside it.
///
/// # Fields
///
/// - `id`: globally unique record identifier
/// - `operation`: insert, update or delete
/// - `entity_type` / `entity_id`: which entity was mutated
/// - `payload`: JSON snapshot of the entity's synchronizable fields
/// - `device_id` / `created_at`: origin and device-local timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Unique record ID.
    pub id: RecordId,
    /// Kind of mutation.
    pub operation: Operation,
    /// Logical name of the entity kind.
    pub entity_type: String,
    /// ID of the mutated entity.
    pub entity_id: EntityId,
    /// JSON snapshot of the entity.
    pub payload: Vec<u8>,
    /// Originating device.
    pub device_id: DeviceId,
    /// Device-local timestamp, strictly increasing per device.
    pub created_at: Timestamp,
}

impl LogRecord {
    /// Creates a record with a fresh ID.
    pub fn new(
        operation: Operation,
        entity_type: impl Into<String>,
        entity_id: EntityId,
        payload: Vec<u8>,
        device_id: DeviceId,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: RecordId::new(),
            operation,
            entity_type: entity_type.into(),
            entity_id,
            payload,
            device_id,
            created_at,
        }
    }

    /// Returns the version this record would give its entity.
    pub fn version(&self) -> Version {
        Version::new(self.created_at, self.device_id.clone())
    }

    /// Returns the version plus delete flag used for conflict decisions.
    pub fn revision(&self) -> Revision {
        Revision::new(self.version(), self.operation.is_delete())
    }

    /// Returns the payload size in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if this record targets the same entity as `other`.
    pub fn same_entity(&self, other: &LogRecord) -> bool {
        self.entity_type == other.entity_type && self.entity_id == other.entity_id
    }
}
