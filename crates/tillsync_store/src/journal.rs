//! Checksummed journal of committed batches.
//!
//! Every commit is one frame:
//!
//! ```text
//! | magic "TSJF" (4) | version u16 (2) | length u32 (4) | payload | crc32 (4) |
//! ```
//!
//! The payload is the CBOR encoding of the batch's mutations and the CRC
//! covers header and payload. A frame is either entirely present or the
//! batch never happened, which is what makes a business write and its log
//! record atomic.

use crate::backend::JournalBackend;
use crate::error::{StoreError, StoreResult};
use crate::tables::Mutation;
use tillsync_protocol::{from_cbor, to_cbor};
use tracing::{debug, warn};

const JOURNAL_MAGIC: [u8; 4] = *b"TSJF";
const JOURNAL_VERSION: u16 = 1;
/// magic (4) + version (2) + length (4)
const HEADER_SIZE: usize = 10;
const CRC_SIZE: usize = 4;

/// Computes the IEEE CRC32 of `data`.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

pub(crate) fn encode_frame(batch: &[Mutation]) -> StoreResult<Vec<u8>> {
    let payload = to_cbor(&batch)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::Encode("journal frame larger than 4 GiB".into()))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(&JOURNAL_MAGIC);
    frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    let crc = crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Result of scanning journal bytes.
#[derive(Debug)]
pub(crate) struct Replay {
    pub(crate) batches: Vec<Vec<Mutation>>,
    /// Length of the prefix made of complete frames.
    pub(crate) valid_len: u64,
}

/// Decodes every complete frame.
///
/// A frame cut short by a crash ends the scan; anything structurally wrong
/// inside a complete frame is corruption.
pub(crate) fn scan(data: &[u8]) -> StoreResult<Replay> {
    let mut batches = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let rest = &data[offset..];
        if rest.len() < HEADER_SIZE {
            break;
        }
        if rest[0..4] != JOURNAL_MAGIC {
            return Err(StoreError::corrupted(format!(
                "invalid frame magic at offset {offset}"
            )));
        }
        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version > JOURNAL_VERSION {
            return Err(StoreError::corrupted(format!(
                "unsupported journal version {version} at offset {offset}"
            )));
        }
        let len = u32::from_le_bytes([rest[6], rest[7], rest[8], rest[9]]) as usize;
        let total = HEADER_SIZE + len + CRC_SIZE;
        if rest.len() < total {
            break;
        }

        let body_end = HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        let computed = crc32(&rest[..body_end]);
        if stored != computed {
            return Err(StoreError::ChecksumMismatch {
                offset: offset as u64,
                expected: stored,
                actual: computed,
            });
        }

        batches.push(from_cbor(&rest[HEADER_SIZE..body_end])?);
        offset += total;
    }

    Ok(Replay {
        batches,
        valid_len: offset as u64,
    })
}

/// Writer side of the journal.
pub(crate) struct Journal {
    backend: Box<dyn JournalBackend>,
    sync_on_commit: bool,
    poisoned: Option<String>,
}

impl Journal {
    pub(crate) fn new(backend: Box<dyn JournalBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
            poisoned: None,
        }
    }

    /// Reads all committed batches, cutting off a torn tail.
    pub(crate) fn recover(&mut self) -> StoreResult<Vec<Vec<Mutation>>> {
        let data = self.backend.read_all()?;
        let replay = scan(&data)?;
        if replay.valid_len < data.len() as u64 {
            warn!(
                valid = replay.valid_len,
                size = data.len(),
                "truncating torn journal tail"
            );
            self.backend.truncate(replay.valid_len)?;
        }
        debug!(batches = replay.batches.len(), "journal recovered");
        Ok(replay.batches)
    }

    /// Appends one batch as a single frame.
    ///
    /// If the write fails the journal is cut back to its previous length.
    /// If that also fails the journal refuses every further write.
    pub(crate) fn append(&mut self, batch: &[Mutation]) -> StoreResult<()> {
        if let Some(reason) = &self.poisoned {
            return Err(StoreError::Unavailable(reason.clone()));
        }

        let frame = encode_frame(batch)?;
        let before = self.backend.size()?;
        let written = self.backend.append(&frame).and_then(|_| {
            if self.sync_on_commit {
                self.backend.sync()
            } else {
                Ok(())
            }
        });

        if let Err(err) = written {
            if let Err(rollback) = self.backend.truncate(before) {
                let reason = format!("journal write failed ({err}) and rollback failed ({rollback})");
                self.poisoned = Some(reason.clone());
                return Err(StoreError::Unavailable(reason));
            }
            return Err(err);
        }
        Ok(())
    }

    pub(crate) fn size(&self) -> StoreResult<u64> {
        self.backend.size()
    }
}
