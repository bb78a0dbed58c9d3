//! Append-only block log.
//!
//! Each record is a `u32` little-endian length followed by the bincode
//! encoding of one block. A record cut short by a crash is dropped on open,
//! but only when it is the last thing in the file: a length that runs past
//! the end while complete blocks still follow it is corruption.

use crate::StorageError;
use log::{debug, info, warn};
use omni_core::Block;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LENGTH_PREFIX: usize = 4;

pub struct BlockLog {
    path: PathBuf,
    file: File,
    records: u64,
}

impl BlockLog {
    /// Open (or create) the log and return every complete block in it.
    ///
    /// SAFETY: A torn trailing record is truncated away so later appends
    /// start on a record boundary. A complete record that fails to decode is
    /// reported as corruption, never skipped.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<Block>), StorageError> {
        let path = path.as_ref().to_path_buf();
        let (blocks, valid_len) = if path.exists() {
            scan(&path)?
        } else {
            (Vec::new(), 0)
        };

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let actual_len = file.metadata()?.len();
        if actual_len > valid_len {
            warn!(
                "Dropping torn tail of {}: {} trailing bytes",
                path.display(),
                actual_len - valid_len
            );
            file.set_len(valid_len)?;
        }

        info!("Opened block log {} with {} blocks", path.display(), blocks.len());
        let log = BlockLog {
            path,
            file,
            records: blocks.len() as u64,
        };
        Ok((log, blocks))
    }

    /// Read every complete block without modifying the file
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<Block>, StorageError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }
        scan(path).map(|(blocks, _)| blocks)
    }

    /// Append one block and flush it to disk
    pub fn append(&mut self, block: &Block) -> Result<(), StorageError> {
        let payload = bincode::serialize(block)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            StorageError::Corrupt(format!(
                "block {} encodes to {} bytes, over the record limit",
                block.index,
                payload.len()
            ))
        })?;

        let mut record = Vec::with_capacity(payload.len() + LENGTH_PREFIX);
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(&payload);
        self.file.write_all(&record)?;
        self.file.sync_data()?;
        self.records += 1;
        debug!("Logged block {} ({} bytes)", block.index, record.len());
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decode records until EOF or a torn tail; returns the blocks and the
/// byte length of the well-formed prefix
fn scan(path: &Path) -> Result<(Vec<Block>, u64), StorageError> {
    let bytes = std::fs::read(path)?;
    let mut blocks = Vec::new();
    let mut offset = 0usize;

    loop {
        let rest = &bytes[offset..];
        if rest.len() < LENGTH_PREFIX {
            // Empty, or a length prefix cut short at the end of the file
            break;
        }
        let len = read_len(rest);
        if len > rest.len() - LENGTH_PREFIX {
            if let Some(next) = next_block_offset(&bytes, offset + LENGTH_PREFIX) {
                return Err(StorageError::Corrupt(format!(
                    "record at offset {} claims {} bytes past the end of the log, \
                     yet a complete block follows at offset {}",
                    offset, len, next
                )));
            }
            break;
        }

        let payload = &rest[LENGTH_PREFIX..LENGTH_PREFIX + len];
        let block: Block = bincode::deserialize(payload).map_err(|e| {
            StorageError::Corrupt(format!("record at offset {}: {}", offset, e))
        })?;
        blocks.push(block);
        offset += LENGTH_PREFIX + len;
    }

    Ok((blocks, offset as u64))
}

fn read_len(bytes: &[u8]) -> usize {
    let mut len_bytes = [0u8; LENGTH_PREFIX];
    len_bytes.copy_from_slice(&bytes[..LENGTH_PREFIX]);
    u32::from_le_bytes(len_bytes) as usize
}

/// First offset at or after `from` holding a complete, decodable record
fn next_block_offset(bytes: &[u8], from: usize) -> Option<usize> {
    (from..bytes.len())
        .take_while(|&at| at + LENGTH_PREFIX <= bytes.len())
        .find(|&at| {
            let rest = &bytes[at..];
            let len = read_len(rest);
            len <= rest.len() - LENGTH_PREFIX
                && bincode::deserialize::<Block>(&rest[LENGTH_PREFIX..LENGTH_PREFIX + len])
                    .is_ok()
        })
}
