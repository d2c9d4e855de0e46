//! # tillsync Protocol
//!
//! Shared vocabulary of the tillsync offline-first sync engine.
//!
//! This crate provides:
//! - Identifiers (`DeviceId`, `EntityId`, `RecordId`) and `Timestamp`
//! - `DeviceClock`, a per-device clock whose readings strictly increase
//! - `LogRecord`, the immutable transaction log record
//! - Push/pull wire messages and their CBOR encoding
//! - Version ordering and pluggable conflict resolution
//!
//! This is a pure protocol crate with no I/O operations. Both the device
//! engine and the remote authority depend on it so that they agree on how
//! two versions of an entity are ordered.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod codec;
mod conflict;
mod error;
mod ids;
mod messages;
mod record;

pub use clock::DeviceClock;
pub use codec::{from_cbor, to_cbor};
pub use conflict::{
    ClientWins, ConflictResolver, ConflictStrategy, DevicePriority, LastWriteWins, Resolution,
    Revision, ServerWins, Version,
};
pub use error::{ProtocolError, ProtocolResult};
pub use ids::{DeviceId, EntityId, RecordId, Timestamp};
pub use messages::{
    PullRequest, PullResponse, PulledRecord, PushRequest, PushResponse, RecordAck, RecordOutcome,
    PROTOCOL_VERSION,
};
pub use record::{LogRecord, Operation};
