//! # tillsync Store
//!
//! The device-local half of the sync engine: a durable store of entity rows,
//! the outbox of log records, and the change capture that ties the two
//! together.
//!
//! ## Durability
//!
//! Every commit is a single checksummed journal frame. A business write and
//! the outbox records describing it are in the same frame, so either both
//! survive a crash or neither does. On open the journal is replayed; a torn
//! final frame is cut off and a damaged frame in the middle is reported as
//! corruption.
//!
//! ## Available Backends
//!
//! - [`MemoryBackend`] - For tests and ephemeral stores
//! - [`FileBackend`] - A single journal file inside a locked directory
//!
//! ## Example
//!
//! ```rust
//! use tillsync_protocol::{DeviceId, EntityId};
//! use tillsync_store::{ChangeKind, LocalStore, SyncStatus};
//!
//! let store = LocalStore::in_memory(DeviceId::new("till-1")).unwrap();
//! store
//!     .write(|txn| {
//!         txn.track_raw(
//!             ChangeKind::Added,
//!             "product",
//!             EntityId::new("sku-1"),
//!             br#"{"name":"Tea"}"#.to_vec(),
//!         )
//!     })
//!     .unwrap();
//!
//! let row = store.get_visible("product", &EntityId::new("sku-1")).unwrap();
//! assert_eq!(row.sync.sync_status, SyncStatus::NotSynced);
//! assert_eq!(store.pending_count(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod capture;
mod config;
mod dir;
mod error;
mod file;
mod journal;
mod memory;
mod outbox;
mod row;
mod store;
mod tables;
mod tombstone;

pub use backend::JournalBackend;
pub use capture::{CaptureSummary, ChangeCapture, ChangeKind, LocalTransaction, Synchronizable};
pub use config::{StoreConfig, ALWAYS_EXCLUDED};
pub use dir::StoreDir;
pub use error::{StoreError, StoreResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use outbox::OutboxStats;
pub use row::{EntityRow, SyncState, SyncStatus};
pub use store::LocalStore;
pub use tables::{Mutation, OutboxEntry, Rejection, StagedBatch};
