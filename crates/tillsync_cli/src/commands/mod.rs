//! CLI command implementations.

pub mod dump_outbox;
pub mod inspect;
pub mod tombstones;

use std::path::Path;
use tillsync_protocol::DeviceId;
use tillsync_store::{LocalStore, StoreConfig};
use tracing::debug;

/// Opens an existing store directory.
///
/// Opening takes the directory lock, so it fails while a device process
/// has the store open. Recovery may trim a torn final frame.
pub fn open_store(path: &Path, device: &str) -> Result<LocalStore, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {:?}", path).into());
    }
    debug!(path = %path.display(), device, "opening store");
    Ok(LocalStore::open(path, DeviceId::new(device), StoreConfig::default())?)
}
