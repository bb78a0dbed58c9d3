//! Request and view types of the engine surface.

use omni_core::{AssetId, BlockSummary, Hash, NftId};
use omni_economics::TransactionType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A caller's intent, translated by the engine into one transaction.
///
/// `NftMint` reads `metadata.name`, `NftTransfer` reads `metadata.nft_id`,
/// `GovernanceRecord` reads `proposal_id` + `vote`, or `title` + `description`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequest {
    pub kind: TransactionType,
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub amount: u128,
    #[serde(default)]
    pub asset: AssetId,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TxRequest {
    pub fn payment(from: &str, to: &str, amount: u128, asset: &str) -> Self {
        Self {
            kind: TransactionType::Payment,
            from: from.to_string(),
            to: to.to_string(),
            amount,
            asset: asset.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: TransactionType) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_meta(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MineOutcome {
    Mined(BlockSummary),
    NothingToMine,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletView {
    pub address: String,
    pub balances: BTreeMap<AssetId, u128>,
    pub owned_nfts: BTreeSet<NftId>,
    pub reserved: BTreeMap<AssetId, u128>,
}

impl WalletView {
    pub fn balance(&self, asset: &str) -> u128 {
        self.balances.get(asset).copied().unwrap_or(0)
    }

    pub fn spendable(&self, asset: &str) -> u128 {
        self.balance(asset)
            .saturating_sub(self.reserved.get(asset).copied().unwrap_or(0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStats {
    pub block_count: usize,
    pub tx_count: usize,
    pub pending_count: usize,
    pub last_hash: Hash,
    pub difficulty: u8,
}
