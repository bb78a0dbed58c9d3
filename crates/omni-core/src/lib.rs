// === Assets and Transactions ===
pub mod asset;
pub mod transaction;

// === Core Chain Logic ===
pub mod block;
pub mod block_validation;
pub mod blockchain;

// === Wallet Store and Mempool ===
pub mod ledger;
pub mod mempool;

// === Re-exports for broader ecosystem access ===
pub use asset::*;
pub use block::{Block, BlockSummary, Hash};
pub use block_validation::BlockValidator;
pub use blockchain::{genesis_candidate, ChainError, HashChain};
pub use ledger::*;
pub use mempool::*;
pub use transaction::{Transaction, TxId, TxStatus};

pub use omni_economics::{FeeSchedule, TransactionType};
