//! Journal backend trait.

use crate::error::StoreResult;

/// An append-only byte store holding the local journal.
///
/// Backends know nothing about frames or mutations; the journal owns the
/// format. `append` returns the offset written at, `sync` makes every
/// appended byte durable, and `truncate` is only ever used to cut off a
/// torn or failed tail.
pub trait JournalBackend: Send + Sync {
    /// Reads the whole journal.
    fn read_all(&self) -> StoreResult<Vec<u8>>;

    /// Appends bytes, returning the offset they start at.
    fn append(&mut self, data: &[u8]) -> StoreResult<u64>;

    /// Makes all appended data durable.
    fn sync(&mut self) -> StoreResult<()>;

    /// Returns the current size in bytes.
    fn size(&self) -> StoreResult<u64>;

    /// Shrinks the journal to `new_size` bytes.
    fn truncate(&mut self, new_size: u64) -> StoreResult<()>;
}
