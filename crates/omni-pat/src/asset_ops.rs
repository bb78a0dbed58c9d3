//! Payments, NFT mint/transfer and loyalty rewards.
//!
//! Every operation builds a transaction and hands it to a
//! [`TransactionSubmitter`]; nothing here touches balances directly.

use crate::asset_token::{RarityError, RarityTable};
use log::{debug, info};
use omni_core::{
    AdmissionError, NftId, Transaction, TransactionSubmitter, TransactionType, TxId,
    META_NFT_ID, META_NFT_NAME, META_NFT_RARITY, META_USER_PREFIX, NFT_ASSET,
};
use rand::Rng;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Fresh transaction id
pub fn new_tx_id() -> TxId {
    Uuid::new_v4().to_string()
}

/// NFT id drawn from `rng`, so seeded runs mint reproducible ids
pub fn new_nft_id<R: Rng + ?Sized>(rng: &mut R) -> NftId {
    uuid::Builder::from_random_bytes(rng.gen()).into_uuid().to_string()
}

/// Result of an accepted mint: the new token and the transaction carrying it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    pub nft_id: NftId,
    pub tx_id: TxId,
}

pub struct AssetOps<'a, S: TransactionSubmitter + ?Sized> {
    submitter: &'a S,
    rarity: RarityTable,
}

impl<'a, S: TransactionSubmitter + ?Sized> AssetOps<'a, S> {
    pub fn new(submitter: &'a S) -> Self {
        Self {
            submitter,
            rarity: RarityTable::default(),
        }
    }

    /// Replace the rarity distribution; malformed tables are refused
    pub fn with_rarity(mut self, rarity: RarityTable) -> Result<Self, RarityError> {
        rarity.validate()?;
        self.rarity = rarity;
        Ok(self)
    }

    /// Fungible transfer of `amount` minor units
    pub fn pay(
        &self,
        from: &str,
        to: &str,
        amount: u128,
        asset: &str,
        kind: TransactionType,
        metadata: BTreeMap<String, String>,
    ) -> Result<TxId, AdmissionError> {
        if kind.is_nft() || kind == TransactionType::Issuance {
            return Err(AdmissionError::InvalidTransaction(format!(
                "{} is not a payment kind",
                kind
            )));
        }
        let tx = Transaction::new(
            new_tx_id(),
            from,
            to,
            amount,
            asset,
            kind,
            metadata,
            self.submitter.now_millis(),
        );
        let id = self.submitter.submit(tx)?;
        debug!("Submitted {} {} {} -> {} ({})", kind, amount, asset, to, id);
        Ok(id)
    }

    /// Mint a new NFT owned by `creator`, with rarity drawn from `rng`
    pub fn mint_nft<R: Rng + ?Sized>(
        &self,
        creator: &str,
        name: &str,
        metadata: BTreeMap<String, String>,
        rng: &mut R,
    ) -> Result<MintReceipt, AdmissionError> {
        if name.trim().is_empty() {
            return Err(AdmissionError::InvalidTransaction("NFT name is empty".into()));
        }

        let nft_id = new_nft_id(rng);
        let rarity = self.rarity.sample(rng);

        let mut tx_metadata: BTreeMap<String, String> = metadata
            .into_iter()
            .map(|(key, value)| (format!("{}{}", META_USER_PREFIX, key), value))
            .collect();
        tx_metadata.insert(META_NFT_ID.to_string(), nft_id.clone());
        tx_metadata.insert(META_NFT_NAME.to_string(), name.to_string());
        tx_metadata.insert(META_NFT_RARITY.to_string(), rarity.name().to_string());

        let tx = Transaction::new(
            new_tx_id(),
            creator,
            creator,
            0,
            NFT_ASSET,
            TransactionType::NftMint,
            tx_metadata,
            self.submitter.now_millis(),
        );
        let tx_id = self.submitter.submit(tx)?;
        info!("Minting NFT {} '{}' ({}) for {}", nft_id, name, rarity, creator);
        Ok(MintReceipt { nft_id, tx_id })
    }

    /// Move an NFT; fails fast when `from` is not the current owner
    pub fn transfer_nft(&self, from: &str, to: &str, nft_id: &str) -> Result<TxId, AdmissionError> {
        if self.submitter.nft_owner(nft_id).as_deref() != Some(from) {
            return Err(AdmissionError::NotOwner {
                address: from.to_string(),
                nft_id: nft_id.to_string(),
            });
        }

        let mut metadata = BTreeMap::new();
        metadata.insert(META_NFT_ID.to_string(), nft_id.to_string());
        let tx = Transaction::new(
            new_tx_id(),
            from,
            to,
            0,
            NFT_ASSET,
            TransactionType::NftTransfer,
            metadata,
            self.submitter.now_millis(),
        );
        self.submitter.submit(tx)
    }

    /// Merchant pays a customer in a loyalty asset
    pub fn reward_loyalty(
        &self,
        merchant: &str,
        customer: &str,
        amount: u128,
        asset: &str,
    ) -> Result<TxId, AdmissionError> {
        self.pay(
            merchant,
            customer,
            amount,
            asset,
            TransactionType::LoyaltyReward,
            BTreeMap::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use omni_core::Address;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    mock! {
        Submitter {}
        impl TransactionSubmitter for Submitter {
            fn submit(&self, tx: Transaction) -> Result<TxId, AdmissionError>;
            fn balance_of(&self, address: &str, asset: &str) -> u128;
            fn nft_owner(&self, nft_id: &str) -> Option<Address>;
            fn now_millis(&self) -> u64;
        }
    }

    fn submitter() -> MockSubmitter {
        let mut mock = MockSubmitter::new();
        mock.expect_now_millis().return_const(1_000u64);
        mock
    }

    #[test]
    fn test_pay_submits_payment() {
        let mut mock = submitter();
        mock.expect_submit()
            .withf(|tx| {
                tx.kind == TransactionType::Payment
                    && tx.from == "alice"
                    && tx.to == "bob"
                    && tx.amount == 25
                    && tx.created_at == 1_000
            })
            .times(1)
            .returning(|tx| Ok(tx.id));

        let ops = AssetOps::new(&mock);
        let id = ops
            .pay("alice", "bob", 25, "OMNI", TransactionType::Payment, BTreeMap::new())
            .unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_pay_rejects_nft_kinds() {
        let mock = submitter();
        let ops = AssetOps::new(&mock);
        let err = ops
            .pay("alice", "bob", 1, "NFT", TransactionType::NftTransfer, BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, AdmissionError::InvalidTransaction(_)));
    }

    #[test]
    fn test_mint_nft_carries_token_fields() {
        let mut mock = submitter();
        mock.expect_submit()
            .withf(|tx| {
                tx.kind == TransactionType::NftMint
                    && tx.from == "maker"
                    && tx.to == "maker"
                    && tx.amount == 0
                    && tx.asset == NFT_ASSET
                    && tx.metadata.get("meta.edition").map(String::as_str) == Some("1")
            })
            .times(1)
            .returning(|tx| {
                let token = tx.minted_token().expect("mint carries a token");
                assert_eq!(token.name, "Aurora");
                Ok(tx.id)
            });

        let mut metadata = BTreeMap::new();
        metadata.insert("edition".to_string(), "1".to_string());
        let ops = AssetOps::new(&mock);
        let receipt = ops
            .mint_nft("maker", "Aurora", metadata, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert!(Uuid::parse_str(&receipt.nft_id).is_ok());
        assert_ne!(receipt.nft_id, receipt.tx_id);
    }

    #[test]
    fn test_seeded_mint_is_reproducible() {
        let mut mock = submitter();
        mock.expect_submit().returning(|tx| Ok(tx.id));
        let ops = AssetOps::new(&mock);

        let a = ops
            .mint_nft("maker", "A", BTreeMap::new(), &mut StdRng::seed_from_u64(9))
            .unwrap();
        let b = ops
            .mint_nft("maker", "A", BTreeMap::new(), &mut StdRng::seed_from_u64(9))
            .unwrap();
        assert_eq!(a.nft_id, b.nft_id);
        assert_ne!(a.tx_id, b.tx_id);
    }

    #[test]
    fn test_forced_rarity_table() {
        let mut mock = submitter();
        mock.expect_submit()
            .withf(|tx| tx.metadata.get(META_NFT_RARITY).map(String::as_str) == Some("legendary"))
            .returning(|tx| Ok(tx.id));
        let ops = AssetOps::new(&mock)
            .with_rarity(RarityTable {
                cumulative: [0.0, 0.0, 0.0, 0.0, 1.0],
            })
            .unwrap();
        ops.mint_nft("maker", "Relic", BTreeMap::new(), &mut StdRng::seed_from_u64(3))
            .unwrap();
    }

    #[test]
    fn test_malformed_rarity_table_refused() {
        let mock = submitter();
        let result = AssetOps::new(&mock).with_rarity(RarityTable {
            cumulative: [0.6, 0.85, 0.95, 0.99, 0.5],
        });
        assert!(matches!(result, Err(RarityError::NotMonotonic { .. })));
    }

    #[test]
    fn test_transfer_nft_fails_fast_for_non_owner() {
        let mut mock = submitter();
        mock.expect_nft_owner()
            .returning(|_| Some("alice".to_string()));
        mock.expect_submit().never();

        let ops = AssetOps::new(&mock);
        let err = ops.transfer_nft("mallory", "bob", "nft-1").unwrap_err();
        assert_eq!(
            err,
            AdmissionError::NotOwner {
                address: "mallory".into(),
                nft_id: "nft-1".into()
            }
        );
    }

    #[test]
    fn test_transfer_nft_by_owner() {
        let mut mock = submitter();
        mock.expect_nft_owner()
            .returning(|_| Some("alice".to_string()));
        mock.expect_submit()
            .withf(|tx| {
                tx.kind == TransactionType::NftTransfer
                    && tx.nft_id().map(String::as_str) == Some("nft-1")
                    && tx.to == "bob"
            })
            .times(1)
            .returning(|tx| Ok(tx.id));

        let ops = AssetOps::new(&mock);
        assert!(ops.transfer_nft("alice", "bob", "nft-1").is_ok());
    }

    #[test]
    fn test_reward_loyalty_uses_loyalty_kind() {
        let mut mock = submitter();
        mock.expect_submit()
            .withf(|tx| tx.kind == TransactionType::LoyaltyReward && tx.asset == "LOYAL")
            .times(1)
            .returning(|tx| Ok(tx.id));

        let ops = AssetOps::new(&mock);
        assert!(ops
            .reward_loyalty("shop", "customer", 10, "LOYAL")
            .is_ok());
    }

    #[test]
    fn test_submitter_errors_propagate() {
        let mut mock = submitter();
        mock.expect_submit()
            .returning(|_| Err(AdmissionError::UnknownAsset("XYZ".into())));
        let ops = AssetOps::new(&mock);
        let err = ops
            .pay("alice", "bob", 1, "XYZ", TransactionType::Payment, BTreeMap::new())
            .unwrap_err();
        assert_eq!(err, AdmissionError::UnknownAsset("XYZ".into()));
    }
}
