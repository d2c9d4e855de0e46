//! File journal backend.

use crate::backend::JournalBackend;
use crate::error::{StoreError, StoreResult};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal backend over a single OS file.
///
/// `sync` calls `File::sync_data`; appends are only durable after it.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens or creates the journal file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JournalBackend for FileBackend {
    fn read_all(&self) -> StoreResult<Vec<u8>> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::with_capacity(self.size as usize);
        file.take(self.size).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(self.size)
    }

    fn truncate(&mut self, new_size: u64) -> StoreResult<()> {
        if new_size > self.size {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate {} to {new_size} bytes, current size is {}",
                    self.path.display(),
                    self.size
                ),
            )));
        }
        self.file.set_len(new_size)?;
        self.file.sync_all()?;
        self.size = new_size;
        Ok(())
    }
}
