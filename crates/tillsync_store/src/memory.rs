//! In-memory journal backend.

use crate::backend::JournalBackend;
use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A journal backend kept in memory.
///
/// Clones share the same bytes, so a test can keep a clone, drop the store
/// and open a new one over the clone to simulate a process restart. Writes
/// can be made to fail on demand to exercise storage-failure paths.
///
/// ```rust
/// use tillsync_store::{JournalBackend, MemoryBackend};
///
/// let mut backend = MemoryBackend::new();
/// let survivor = backend.clone();
/// backend.append(b"frame").unwrap();
/// assert_eq!(survivor.size().unwrap(), 5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding existing bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Makes every following append, sync and truncate fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated write failure",
            )));
        }
        Ok(())
    }
}

impl JournalBackend for MemoryBackend {
    fn read_all(&self) -> StoreResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&mut self, bytes: &[u8]) -> StoreResult<u64> {
        self.check_writable()?;
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.check_writable()
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StoreResult<()> {
        self.check_writable()?;
        let mut data = self.data.write();
        if new_size > data.len() as u64 {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot grow journal to {new_size} bytes by truncation"),
            )));
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}
