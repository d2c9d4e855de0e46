//! Store directory layout and locking.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK             # Advisory lock, one process per store
//! └─ outbox.journal   # Checksummed journal of committed batches
//! ```

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "outbox.journal";

/// An opened store directory holding the exclusive lock.
///
/// The lock is released when this value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens (creating if needed) a store directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process holds the lock, or
    /// an I/O error if the directory cannot be created.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(StoreError::corrupted(format!(
                "store path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the journal file path.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }
}
