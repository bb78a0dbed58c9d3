//! OMNI persistence: the append-only block log and ledger snapshots.

pub mod block_log;
pub mod snapshot_engine;

pub use block_log::BlockLog;
pub use snapshot_engine::{LedgerSnapshot, SnapshotStore};

use thiserror::Error;

/// File holding the block log inside a data directory
pub const BLOCK_LOG_FILE: &str = "blocks.log";

/// File holding the latest ledger snapshot inside a data directory
pub const SNAPSHOT_FILE: &str = "ledger.snapshot";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Corrupt storage: {0}")]
    Corrupt(String),
}
