//! Asset identifiers, NFT tokens and the asset policy shared by ledger and mempool.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Wallet address (hex string derived from a public key)
pub type Address = String;

/// Fungible currency code, or the reserved NFT marker
pub type AssetId = String;

/// Opaque NFT identifier
pub type NftId = String;

/// Asset marker carried by NFT mint/transfer transactions
pub const NFT_ASSET: &str = "NFT";

/// Metadata keys used by NFT transactions
pub const META_NFT_ID: &str = "nft_id";
pub const META_NFT_NAME: &str = "name";
pub const META_NFT_RARITY: &str = "rarity";
/// Prefix for user-supplied token metadata inside a mint transaction
pub const META_USER_PREFIX: &str = "meta.";

/// NFT rarity tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    pub const ALL: [Rarity; 5] = [
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::Epic,
        Rarity::Legendary,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Uncommon => "uncommon",
            Self::Rare => "rare",
            Self::Epic => "epic",
            Self::Legendary => "legendary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Rarity::ALL.iter().copied().find(|r| r.name().eq_ignore_ascii_case(s))
    }
}

impl std::fmt::Display for Rarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A minted collectible. Created once; afterwards only `owner` changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftToken {
    pub id: NftId,
    pub name: String,
    pub metadata: BTreeMap<String, String>,
    pub owner: Address,
    pub creator: Address,
    pub rarity: Rarity,
    /// Creation time of the mint transaction (ms)
    pub minted_at: u64,
}

/// Which assets the ledger accepts and where fees go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPolicy {
    /// Fungible assets accepted on admission
    pub known_assets: BTreeSet<AssetId>,
    /// Asset every fee is paid in
    pub fee_asset: AssetId,
    /// Address credited with every fee
    pub fee_sink: Address,
}

impl AssetPolicy {
    pub fn new(known_assets: impl IntoIterator<Item = AssetId>, fee_asset: &str, fee_sink: &str) -> Self {
        let mut known_assets: BTreeSet<AssetId> = known_assets.into_iter().collect();
        known_assets.insert(fee_asset.to_string());
        AssetPolicy {
            known_assets,
            fee_asset: fee_asset.to_string(),
            fee_sink: fee_sink.to_string(),
        }
    }

    /// Whether `asset` is an accepted fungible asset
    pub fn is_known(&self, asset: &str) -> bool {
        asset != NFT_ASSET && self.known_assets.contains(asset)
    }
}

impl Default for AssetPolicy {
    fn default() -> Self {
        AssetPolicy::new(
            ["OMNI".to_string(), "LOYAL".to_string(), "GOV".to_string()],
            "OMNI",
            "omni-fee-sink",
        )
    }
}
