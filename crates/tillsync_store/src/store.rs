//! The local store: journal, tables and device clock.

use crate::backend::JournalBackend;
use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::StoreResult;
use crate::file::FileBackend;
use crate::journal::Journal;
use crate::memory::MemoryBackend;
use crate::row::EntityRow;
use crate::tables::{StagedBatch, Tables};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use tillsync_protocol::{DeviceClock, DeviceId, EntityId};
use tracing::info;

/// A device's durable local store.
///
/// Holds entity rows with their sync state, the outbox of log records,
/// the rejection side table and the pull watermark. All of it is rebuilt
/// on open by replaying the journal.
///
/// # Concurrency
///
/// Writers serialize on the journal mutex and build their batch against a
/// read snapshot of the tables; readers only take the tables' read lock for
/// as long as it takes to clone what they need. No lock is ever held by a
/// caller across an `await`.
///
/// Writes go through [`LocalStore::commit_with`], the capture API or the
/// outbox methods. Raw mutation lists cannot be committed from outside the
/// crate:
///
/// ```compile_fail
/// use tillsync_protocol::DeviceId;
/// use tillsync_store::{LocalStore, Mutation};
///
/// let store = LocalStore::in_memory(DeviceId::new("till-1")).unwrap();
/// store.commit(Vec::<Mutation>::new()).unwrap();
/// ```
pub struct LocalStore {
    device_id: DeviceId,
    config: StoreConfig,
    journal: Mutex<Journal>,
    tables: RwLock<Tables>,
    clock: DeviceClock,
    _dir: Option<StoreDir>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("device_id", &self.device_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    /// Opens (or creates) a store directory on disk.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Locked`] if another process has the
    /// directory open, or a corruption error if the journal is damaged.
    pub fn open(path: &Path, device_id: DeviceId, config: StoreConfig) -> StoreResult<Self> {
        let dir = StoreDir::open(path)?;
        let backend = FileBackend::open(&dir.journal_path())?;
        let mut store = Self::with_backend(Box::new(backend), device_id, config)?;
        info!(path = %dir.path().display(), device = %store.device_id, "opened local store");
        store._dir = Some(dir);
        Ok(store)
    }

    /// Opens a store over any journal backend.
    pub fn with_backend(
        backend: Box<dyn JournalBackend>,
        device_id: DeviceId,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let mut journal = Journal::new(backend, config.sync_on_commit);
        let mut tables = Tables::default();
        for batch in journal.recover()? {
            for mutation in &batch {
                tables.apply(mutation);
            }
        }
        let clock = DeviceClock::starting_after(tables.high_clock);

        Ok(Self {
            device_id,
            config,
            journal: Mutex::new(journal),
            tables: RwLock::new(tables),
            clock,
            _dir: None,
        })
    }

    /// Creates an empty store kept in memory.
    pub fn in_memory(device_id: DeviceId) -> StoreResult<Self> {
        Self::with_backend(
            Box::new(MemoryBackend::new()),
            device_id,
            StoreConfig::default(),
        )
    }

    /// Returns this device's ID.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the device clock.
    pub fn clock(&self) -> &DeviceClock {
        &self.clock
    }

    /// Returns the journal size in bytes.
    pub fn journal_size(&self) -> StoreResult<u64> {
        self.journal.lock().size()
    }

    /// Commits a prepared batch as one journal frame.
    #[cfg(test)]
    pub(crate) fn commit(&self, batch: Vec<crate::tables::Mutation>) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut journal = self.journal.lock();
        journal.append(&batch)?;
        let mut tables = self.tables.write();
        for mutation in &batch {
            tables.apply(mutation);
        }
        Ok(())
    }

    /// Builds a batch against the current tables and commits it atomically.
    ///
    /// The closure runs while holding the writer lock, so the tables it
    /// reads cannot change before its batch is committed. If it returns an
    /// error nothing is written.
    pub fn commit_with<R>(
        &self,
        build: impl FnOnce(&mut StagedBatch<'_>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut journal = self.journal.lock();
        let (mutations, value) = {
            let tables = self.tables.read();
            let mut staged = StagedBatch::new(&tables);
            let value = build(&mut staged)?;
            (staged.into_mutations(), value)
        };

        if !mutations.is_empty() {
            journal.append(&mutations)?;
            let mut tables = self.tables.write();
            for mutation in &mutations {
                tables.apply(mutation);
            }
        }
        Ok(value)
    }

    /// Returns a row, including soft-deleted rows.
    pub fn get(&self, entity_type: &str, entity_id: &EntityId) -> Option<EntityRow> {
        self.tables.read().row(entity_type, entity_id).cloned()
    }

    /// Returns a row only if it is visible.
    pub fn get_visible(&self, entity_type: &str, entity_id: &EntityId) -> Option<EntityRow> {
        self.get(entity_type, entity_id)
            .filter(EntityRow::is_visible)
    }

    /// Lists the visible rows of one entity type.
    pub fn list_visible(&self, entity_type: &str) -> Vec<EntityRow> {
        self.tables
            .read()
            .rows
            .values()
            .filter(|row| row.entity_type == entity_type && row.is_visible())
            .cloned()
            .collect()
    }

    /// Lists every row, deleted or not.
    pub fn rows(&self) -> Vec<EntityRow> {
        self.tables.read().rows.values().cloned().collect()
    }

    pub(crate) fn read_tables<R>(&self, read: impl FnOnce(&Tables) -> R) -> R {
        read(&self.tables.read())
    }
}
