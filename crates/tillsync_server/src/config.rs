//! Server configuration.

use std::collections::BTreeSet;
use tillsync_protocol::{DeviceId, DevicePriority};

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Device ID the server writes under; wins timestamp ties by default.
    pub authority_id: DeviceId,
    /// Maximum number of records returned by one pull.
    pub max_pull_batch: u32,
    /// Maximum number of records accepted in one push.
    pub max_push_batch: u32,
    /// Entity types the server accepts. `None` accepts any type.
    pub known_entity_types: Option<BTreeSet<String>>,
    /// Tie-break ordering for versions with equal timestamps.
    pub device_priority: DevicePriority,
}

impl ServerConfig {
    /// Creates a configuration for the authority `authority_id`.
    pub fn new(authority_id: impl Into<String>) -> Self {
        let authority_id = DeviceId::new(authority_id);
        Self {
            device_priority: DevicePriority::authority_first(authority_id.clone()),
            authority_id,
            max_pull_batch: 500,
            max_push_batch: 500,
            known_entity_types: None,
        }
    }

    /// Sets the maximum pull batch size.
    pub fn with_max_pull_batch(mut self, size: u32) -> Self {
        self.max_pull_batch = size;
        self
    }

    /// Sets the maximum push batch size.
    ///
    /// A larger push is answered for its first `size` records only. Clients
    /// resend the unanswered tail, so this may be smaller than their batch
    /// size.
    pub fn with_max_push_batch(mut self, size: u32) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Restricts accepted records to the given entity types.
    pub fn with_known_entity_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_entity_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the device priority used to break timestamp ties.
    pub fn with_device_priority(mut self, priority: DevicePriority) -> Self {
        self.device_priority = priority;
        self
    }

    /// Returns true if records of `entity_type` are accepted.
    pub fn accepts_type(&self, entity_type: &str) -> bool {
        self.known_entity_types
            .as_ref()
            .map_or(true, |known| known.contains(entity_type))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("server")
    }
}
