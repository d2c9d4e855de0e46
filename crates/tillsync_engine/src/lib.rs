//! # tillsync Engine
//!
//! Moves outbox records between a device's [`LocalStore`] and the remote
//! authority, and folds remote records back into local state.
//!
//! This crate provides:
//! - A scheduler with an explicit Idle/Running/Halted state machine
//! - Push of pending records in bounded batches, with per-record outcomes
//! - Paged pull with an atomically advanced watermark
//! - Conflict resolution through a pluggable [`ConflictResolver`]
//! - Retry with exponential backoff, per-call timeouts and cancellation
//! - A CBOR-over-HTTP transport with a pluggable client
//!
//! ## Pass order
//!
//! A pass pushes before it pulls. The remote decides whether a pushed
//! record is current, stale (conflict) or unacceptable (rejected); any
//! conflict it reports is settled by the pull that follows, where the
//! remote's version meets the local one.
//!
//! ## Key Invariants
//!
//! - At most one pass runs at a time per scheduler
//! - A record is marked processed only after the remote acknowledged it
//!   or a newer version replaced it
//! - Applying the same remote records twice, or in another order, yields
//!   the same local state
//! - Deletes win over concurrent updates and are never undone
//!
//! [`LocalStore`]: tillsync_store::LocalStore
//! [`ConflictResolver`]: tillsync_protocol::ConflictResolver

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod config;
mod connectivity;
mod engine;
mod error;
mod http;
mod pull;
mod push;
mod retry;
mod scheduler;
mod shutdown;
mod transport;

pub use apply::{ApplySummary, RemoteApplier};
pub use config::{RetryConfig, SyncConfig};
pub use connectivity::{Connectivity, ManualConnectivity};
pub use engine::{PassOutcome, SyncEngine, SyncReport, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{
    HttpClient, HttpReply, HttpTransport, LoopbackClient, LoopbackServer, PULL_PATH, PUSH_PATH,
};
pub use scheduler::{SchedulerState, SyncScheduler, TriggerOutcome};
pub use shutdown::CancelSignal;
pub use transport::{MockRemote, RemoteAuthority};
