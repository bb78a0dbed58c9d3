//! OMNI node: a single-node ledger engine over the workspace crates.

pub mod api;
pub mod config;
pub mod engine;
pub mod miner_service;

pub use api::{ChainStats, MineOutcome, TxRequest, WalletView};
pub use config::{ConfigError, EngineConfig, GenesisAllocation, MAX_DIFFICULTY};
pub use engine::{EngineError, LedgerEngine};
pub use miner_service::MinerService;

pub use omni_consensus::CancelToken;
pub use omni_core::{Block, BlockSummary, Hash, NftToken, Transaction, TransactionType, TxId};
pub use omni_governance::VoteChoice;
pub use omni_pat::MintReceipt;
pub use omni_wallet_core::WalletKeys;
