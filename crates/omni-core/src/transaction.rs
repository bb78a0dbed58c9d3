use crate::asset::{
    Address, AssetId, NftId, NftToken, Rarity, META_NFT_ID, META_NFT_NAME, META_NFT_RARITY,
    META_USER_PREFIX,
};
use omni_economics::TransactionType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Transaction identifier
pub type TxId = String;

/// Lifecycle of a transaction. Moves out of `Pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub from: Address,
    pub to: Address,
    /// Amount in minor units
    pub amount: u128,
    pub asset: AssetId,
    pub kind: TransactionType,
    /// Fee in minor units of the fee asset; set on admission
    pub fee: u128,
    pub metadata: BTreeMap<String, String>,
    pub status: TxStatus,
    /// Creation time (ms since Unix epoch)
    pub created_at: u64,
}

impl Transaction {
    /// Create a pending transaction. The fee is filled in by the mempool.
    pub fn new(
        id: TxId,
        from: &str,
        to: &str,
        amount: u128,
        asset: &str,
        kind: TransactionType,
        metadata: BTreeMap<String, String>,
        created_at: u64,
    ) -> Self {
        Self {
            id,
            from: from.to_string(),
            to: to.to_string(),
            amount,
            asset: asset.to_string(),
            kind,
            fee: 0,
            metadata,
            status: TxStatus::Pending,
            created_at,
        }
    }

    /// Balances this transaction takes from `from`, grouped per asset.
    ///
    /// Returns `None` if `amount + fee` overflows. Issuance has no debit side.
    pub fn debits(&self, fee_asset: &str) -> Option<Vec<(AssetId, u128)>> {
        if self.kind == TransactionType::Issuance {
            return Some(Vec::new());
        }

        let mut debits: BTreeMap<AssetId, u128> = BTreeMap::new();
        if self.amount > 0 {
            debits.insert(self.asset.clone(), self.amount);
        }
        if self.fee > 0 {
            let entry = debits.entry(fee_asset.to_string()).or_insert(0);
            *entry = entry.checked_add(self.fee)?;
        }
        Some(debits.into_iter().collect())
    }

    /// NFT referenced by a mint or transfer
    pub fn nft_id(&self) -> Option<&NftId> {
        if self.kind.is_nft() {
            self.metadata.get(META_NFT_ID)
        } else {
            None
        }
    }

    /// Reconstruct the token a mint transaction creates
    pub fn minted_token(&self) -> Option<NftToken> {
        if self.kind != TransactionType::NftMint {
            return None;
        }
        let id = self.metadata.get(META_NFT_ID)?.clone();
        let name = self.metadata.get(META_NFT_NAME)?.clone();
        let rarity = Rarity::parse(self.metadata.get(META_NFT_RARITY)?)?;
        let metadata = self
            .metadata
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(META_USER_PREFIX)
                    .map(|key| (key.to_string(), v.clone()))
            })
            .collect();

        Some(NftToken {
            id,
            name,
            metadata,
            owner: self.to.clone(),
            creator: self.from.clone(),
            rarity,
            minted_at: self.created_at,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == TxStatus::Pending
    }

    /// Feed the canonical encoding of this transaction's content into `hasher`.
    ///
    /// Every field except `status` is covered: the outcome is decided after the
    /// block hash is sealed. Strings are length-prefixed, integers little-endian.
    pub fn feed_canonical(&self, hasher: &mut Sha256) {
        write_str(hasher, &self.id);
        write_str(hasher, &self.from);
        write_str(hasher, &self.to);
        hasher.update(self.amount.to_le_bytes());
        write_str(hasher, &self.asset);
        write_str(hasher, self.kind.name());
        hasher.update(self.fee.to_le_bytes());
        hasher.update((self.metadata.len() as u64).to_le_bytes());
        for (key, value) in &self.metadata {
            write_str(hasher, key);
            write_str(hasher, value);
        }
        hasher.update(self.created_at.to_le_bytes());
    }

    /// Digest of the canonical content
    pub fn content_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        self.feed_canonical(&mut hasher);
        hasher.finalize().into()
    }
}

fn write_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(amount: u128, fee: u128) -> Transaction {
        let mut tx = Transaction::new(
            "tx-1".to_string(),
            "alice",
            "bob",
            amount,
            "OMNI",
            TransactionType::Payment,
            BTreeMap::new(),
            42,
        );
        tx.fee = fee;
        tx
    }

    #[test]
    fn test_debits_merge_when_fee_asset_matches() {
        let tx = payment(100, 1);
        assert_eq!(tx.debits("OMNI").unwrap(), vec![("OMNI".to_string(), 101)]);
    }

    #[test]
    fn test_debits_split_across_assets() {
        let mut tx = payment(50, 2);
        tx.asset = "LOYAL".to_string();
        let debits = tx.debits("OMNI").unwrap();
        assert_eq!(
            debits,
            vec![("LOYAL".to_string(), 50), ("OMNI".to_string(), 2)]
        );
    }

    #[test]
    fn test_debits_overflow() {
        let tx = payment(u128::MAX, 1);
        assert!(tx.debits("OMNI").is_none());
    }

    #[test]
    fn test_issuance_has_no_debits() {
        let mut tx = payment(500, 0);
        tx.kind = TransactionType::Issuance;
        assert!(tx.debits("OMNI").unwrap().is_empty());
    }

    #[test]
    fn test_status_not_part_of_content_hash() {
        let tx = payment(100, 1);
        let mut confirmed = tx.clone();
        confirmed.status = TxStatus::Confirmed;
        assert_eq!(tx.content_hash(), confirmed.content_hash());

        let mut tampered = tx.clone();
        tampered.amount = 101;
        assert_ne!(tx.content_hash(), tampered.content_hash());
    }

    #[test]
    fn test_string_boundaries_are_unambiguous() {
        let a = Transaction::new("x".into(), "ab", "c", 1, "OMNI", TransactionType::Payment, BTreeMap::new(), 0);
        let b = Transaction::new("x".into(), "a", "bc", 1, "OMNI", TransactionType::Payment, BTreeMap::new(), 0);
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_minted_token_from_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert(META_NFT_ID.to_string(), "nft-7".to_string());
        metadata.insert(META_NFT_NAME.to_string(), "Sunset".to_string());
        metadata.insert(META_NFT_RARITY.to_string(), "epic".to_string());
        metadata.insert("meta.artist".to_string(), "kim".to_string());
        let tx = Transaction::new(
            "tx-2".into(),
            "creator",
            "creator",
            0,
            crate::asset::NFT_ASSET,
            TransactionType::NftMint,
            metadata,
            99,
        );

        let token = tx.minted_token().unwrap();
        assert_eq!(token.id, "nft-7");
        assert_eq!(token.rarity, Rarity::Epic);
        assert_eq!(token.owner, "creator");
        assert_eq!(token.minted_at, 99);
        assert_eq!(token.metadata.get("artist").map(String::as_str), Some("kim"));
    }
}
