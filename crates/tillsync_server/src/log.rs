//! Server-side record log.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tillsync_protocol::{DevicePriority, EntityId, LogRecord, PulledRecord, RecordId, Revision};

/// What the log did with one offered record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Appended under a new sequence number.
    Accepted {
        /// Sequence assigned to the record.
        sequence: u64,
    },
    /// Already logged earlier; nothing changed.
    Duplicate,
    /// The entity already holds a revision this record does not supersede.
    Stale {
        /// The revision the server holds.
        current: Revision,
    },
}

#[derive(Default)]
struct LogState {
    /// Records in sequence order; `entries[i]` has sequence `i + 1`.
    entries: Vec<PulledRecord>,
    /// IDs of every logged record.
    seen: HashSet<RecordId>,
    /// Winning revision per `(entity_type, entity_id)`.
    current: HashMap<(String, EntityId), Revision>,
}

/// Server-side record log.
///
/// The log keeps:
/// - All accepted records in the order they were accepted
/// - The set of logged record IDs, so a redelivered record is logged once
/// - The winning revision of each entity, for stale-write detection
///
/// Sequence numbers start at 1 and are dense, so a device's watermark is
/// simply the highest sequence it has applied.
pub struct ServerLog {
    state: RwLock<LogState>,
    priority: DevicePriority,
}

impl ServerLog {
    /// Creates an empty log ordering versions by `priority`.
    pub fn new(priority: DevicePriority) -> Self {
        Self {
            state: RwLock::new(LogState::default()),
            priority,
        }
    }

    /// Offers a record to the log.
    ///
    /// Deletes are always logged, since they win over any concurrent
    /// update; they only replace the current revision when they supersede
    /// it. Inserts and updates are logged only if they supersede the
    /// current revision.
    pub fn admit(&self, record: LogRecord) -> Admission {
        let mut state = self.state.write();
        if state.seen.contains(&record.id) {
            return Admission::Duplicate;
        }

        let key = (record.entity_type.clone(), record.entity_id.clone());
        let incoming = record.revision();
        let replaces = match state.current.get(&key) {
            None => true,
            Some(current) => {
                let replaces = incoming.supersedes(current, &self.priority);
                if !replaces && !incoming.is_delete {
                    return Admission::Stale {
                        current: current.clone(),
                    };
                }
                replaces
            }
        };

        if replaces {
            state.current.insert(key, incoming);
        }
        let sequence = state.entries.len() as u64 + 1;
        state.seen.insert(record.id);
        state.entries.push(PulledRecord { sequence, record });
        Admission::Accepted { sequence }
    }

    /// Returns up to `limit` records with a sequence above `since`, and
    /// whether more remain after them.
    pub fn since(&self, since: u64, limit: u32) -> (Vec<PulledRecord>, bool) {
        let state = self.state.read();
        let start = usize::try_from(since)
            .unwrap_or(usize::MAX)
            .min(state.entries.len());
        let end = start
            .saturating_add(limit as usize)
            .min(state.entries.len());
        let page = state.entries[start..end].to_vec();
        (page, end < state.entries.len())
    }

    /// Returns the highest assigned sequence, or 0 for an empty log.
    pub fn head(&self) -> u64 {
        self.state.read().entries.len() as u64
    }

    /// Returns the number of logged records.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Returns the winning revision of an entity.
    pub fn current(&self, entity_type: &str, entity_id: &EntityId) -> Option<Revision> {
        self.state
            .read()
            .current
            .get(&(entity_type.to_string(), entity_id.clone()))
            .cloned()
    }

    /// Returns true if the record ID has been logged.
    pub fn contains(&self, id: &RecordId) -> bool {
        self.state.read().seen.contains(id)
    }
}

impl Default for ServerLog {
    fn default() -> Self {
        Self::new(DevicePriority::default())
    }
}
