//! Version ordering and conflict resolution.
//!
//! Every device and the remote authority order versions the same way, so
//! that applying the same records in any order converges to the same state:
//!
//! 1. A delete absorbs any non-delete version of the same entity.
//! 2. Otherwise the later `created_at` wins.
//! 3. Equal timestamps are broken by [`DevicePriority`].
//!
//! A [`ConflictResolver`] only comes into play when a device holds an
//! unsynced local version and a remote version arrives for the same entity.

use crate::ids::{DeviceId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// The version of an entity: when and where its content was written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Device-local timestamp of the write.
    pub created_at: Timestamp,
    /// Device that made the write.
    pub device_id: DeviceId,
}

impl Version {
    /// Creates a version.
    pub fn new(created_at: Timestamp, device_id: DeviceId) -> Self {
        Self {
            created_at,
            device_id,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.created_at.as_millis(), self.device_id)
    }
}

/// A version together with whether it deleted the entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision {
    /// The version.
    pub version: Version,
    /// True if this version is a delete.
    pub is_delete: bool,
}

impl Revision {
    /// Creates a revision.
    pub fn new(version: Version, is_delete: bool) -> Self {
        Self { version, is_delete }
    }

    /// Returns true if `self` should replace `current` when there is no
    /// unsynced local edit involved.
    ///
    /// Deletes are terminal: a delete replaces any live version and no live
    /// version replaces a delete. Between two versions of the same kind the
    /// one ordered later by `priority` wins; an identical version never
    /// supersedes itself, which makes re-application a no-op.
    pub fn supersedes(&self, current: &Revision, priority: &DevicePriority) -> bool {
        match (self.is_delete, current.is_delete) {
            (true, false) => true,
            (false, true) => false,
            _ => priority.compare(&self.version, &current.version) == Ordering::Greater,
        }
    }
}

/// Fixed ordering of devices used to break timestamp ties.
///
/// Devices earlier in the list win. Devices not listed rank after every
/// listed device and are ordered among themselves by their ID so the
/// result stays total and deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePriority {
    ranked: Vec<DeviceId>,
}

impl DevicePriority {
    /// Creates a priority list, highest priority first.
    pub fn new(ranked: Vec<DeviceId>) -> Self {
        Self { ranked }
    }

    /// Creates a priority list where the remote authority wins all ties.
    pub fn authority_first(authority: DeviceId) -> Self {
        Self {
            ranked: vec![authority],
        }
    }

    /// Returns the ranked devices.
    pub fn ranked(&self) -> &[DeviceId] {
        &self.ranked
    }

    fn rank(&self, device: &DeviceId) -> usize {
        self.ranked
            .iter()
            .position(|d| d == device)
            .unwrap_or(self.ranked.len())
    }

    /// Compares two devices; `Greater` means `a` wins a tie.
    pub fn compare_devices(&self, a: &DeviceId, b: &DeviceId) -> Ordering {
        // Lower rank wins, hence the reversed comparison.
        self.rank(b)
            .cmp(&self.rank(a))
            .then_with(|| a.as_str().cmp(b.as_str()))
    }

    /// Total order over versions; `Greater` means `a` is the later write.
    pub fn compare(&self, a: &Version, b: &Version) -> Ordering {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| self.compare_devices(&a.device_id, &b.device_id))
    }
}

/// Outcome of resolving a local unsynced version against a remote one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// The local version survives; the remote record is ignored.
    KeepLocal,
    /// The remote version replaces local state; local records are dropped.
    AcceptRemote,
}

impl Resolution {
    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            Resolution::KeepLocal => 1,
            Resolution::AcceptRemote => 2,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Resolution::KeepLocal),
            2 => Some(Resolution::AcceptRemote),
            _ => None,
        }
    }
}

/// Decides between a local unsynced version and an incoming remote one.
///
/// Implementations only choose between two live versions (or two deletes).
/// The delete-wins rule is applied by [`ConflictResolver::resolve`] before
/// the strategy is consulted, and every implementation must be a pure
/// function of its inputs.
pub trait ConflictResolver: Send + Sync + fmt::Debug {
    /// Short strategy name for logs.
    fn name(&self) -> &'static str;

    /// Chooses between two versions of the same kind.
    fn prefer(&self, local: &Version, remote: &Version) -> Resolution;

    /// Resolves a conflict, applying delete-wins first.
    fn resolve(&self, local: &Revision, remote: &Revision) -> Resolution {
        match (local.is_delete, remote.is_delete) {
            (true, false) => Resolution::KeepLocal,
            (false, true) => Resolution::AcceptRemote,
            _ => self.prefer(&local.version, &remote.version),
        }
    }
}

/// Later timestamp wins, ties broken by device priority.
#[derive(Debug, Clone, Default)]
pub struct LastWriteWins {
    priority: DevicePriority,
}

impl LastWriteWins {
    /// Creates the strategy with a tie-break ordering.
    pub fn new(priority: DevicePriority) -> Self {
        Self { priority }
    }
}

impl ConflictResolver for LastWriteWins {
    fn name(&self) -> &'static str {
        "last-write-wins"
    }

    fn prefer(&self, local: &Version, remote: &Version) -> Resolution {
        // Identical versions resolve to the remote so repeats are no-ops.
        match self.priority.compare(local, remote) {
            Ordering::Greater => Resolution::KeepLocal,
            Ordering::Less | Ordering::Equal => Resolution::AcceptRemote,
        }
    }
}

/// The remote authority's version always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerWins;

impl ConflictResolver for ServerWins {
    fn name(&self) -> &'static str {
        "server-wins"
    }

    fn prefer(&self, _local: &Version, _remote: &Version) -> Resolution {
        Resolution::AcceptRemote
    }
}

/// The local device's version always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientWins;

impl ConflictResolver for ClientWins {
    fn name(&self) -> &'static str {
        "client-wins"
    }

    fn prefer(&self, _local: &Version, _remote: &Version) -> Resolution {
        Resolution::KeepLocal
    }
}

/// Configurable choice of conflict strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictStrategy {
    /// Later timestamp wins.
    #[default]
    LastWriteWins,
    /// Remote always wins.
    ServerWins,
    /// Local always wins.
    ClientWins,
}

impl ConflictStrategy {
    /// Returns the strategy name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::LastWriteWins => "last-write-wins",
            ConflictStrategy::ServerWins => "server-wins",
            ConflictStrategy::ClientWins => "client-wins",
        }
    }

    /// Parses a strategy name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "last-write-wins" | "lww" => Some(ConflictStrategy::LastWriteWins),
            "server-wins" => Some(ConflictStrategy::ServerWins),
            "client-wins" => Some(ConflictStrategy::ClientWins),
            _ => None,
        }
    }

    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictStrategy::ServerWins => 1,
            ConflictStrategy::ClientWins => 2,
            ConflictStrategy::LastWriteWins => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictStrategy::ServerWins),
            2 => Some(ConflictStrategy::ClientWins),
            3 => Some(ConflictStrategy::LastWriteWins),
            _ => None,
        }
    }

    /// Builds the resolver for this strategy.
    pub fn into_resolver(self, priority: DevicePriority) -> Arc<dyn ConflictResolver> {
        match self {
            ConflictStrategy::LastWriteWins => Arc::new(LastWriteWins::new(priority)),
            ConflictStrategy::ServerWins => Arc::new(ServerWins),
            ConflictStrategy::ClientWins => Arc::new(ClientWins),
        }
    }
}
