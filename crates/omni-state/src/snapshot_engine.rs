// LEDGER SNAPSHOTS
// Reservation-free ledger state pinned to a chain height
//
// SAFETY INVARIANTS:
// 1. A snapshot is written to a temp file and renamed into place, never
//    overwritten in situ
// 2. `height` and `tip_hash` identify the block the state reflects
// 3. A snapshot is only trusted if its tip hash matches the block log

use crate::StorageError;
use log::{debug, info};
use omni_core::{Hash, LedgerState};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Index of the last block folded into `state`
    pub height: u64,
    pub tip_hash: Hash,
    pub state: LedgerState,
}

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write atomically: temp file, fsync, rename
    pub fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StorageError> {
        let bytes = bincode::serialize(snapshot)?;
        let temp_path = self.path.with_extension("tmp");

        let mut file = File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        info!(
            "Saved ledger snapshot at height {} ({} wallets)",
            snapshot.height,
            snapshot.state.wallets.len()
        );
        Ok(())
    }

    /// `None` when no snapshot has been written yet
    pub fn load(&self) -> Result<Option<LedgerSnapshot>, StorageError> {
        if !self.path.exists() {
            debug!("No snapshot at {}", self.path.display());
            return Ok(None);
        }
        let bytes = fs::read(&self.path)?;
        let snapshot: LedgerSnapshot = bincode::deserialize(&bytes)
            .map_err(|e| StorageError::Corrupt(format!("snapshot {}: {}", self.path.display(), e)))?;
        Ok(Some(snapshot))
    }
}
