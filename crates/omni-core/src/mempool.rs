use crate::asset::{Address, AssetId, NFT_ASSET};
use crate::ledger::{InsufficientFunds, Ledger, NftLockError};
use crate::transaction::{Transaction, TxId, TxStatus};
use log::{debug, info, warn};
use omni_economics::{FeeSchedule, TransactionType};
use std::collections::{HashSet, VecDeque};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("{0}")]
    InsufficientFunds(#[from] InsufficientFunds),

    #[error("Unknown asset: {0}")]
    UnknownAsset(AssetId),

    #[error("{address} does not own NFT {nft_id}")]
    NotOwner { address: Address, nft_id: String },

    #[error("NFT {0} already has a pending transfer")]
    NftLocked(String),

    #[error("Duplicate transaction: {0}")]
    Duplicate(TxId),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
}

impl From<NftLockError> for AdmissionError {
    fn from(err: NftLockError) -> Self {
        match err {
            NftLockError::NotOwner { address, nft_id } => AdmissionError::NotOwner { address, nft_id },
            NftLockError::Locked(nft_id) => AdmissionError::NftLocked(nft_id),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("Transaction not pending: {0}")]
    NotFound(TxId),
}

/// Seam between the asset/governance builders and whatever owns the pool.
///
/// The engine implements this by taking its mempool and ledger locks for the
/// whole admission, so the check-then-reserve step is atomic.
pub trait TransactionSubmitter {
    /// Admit a pending transaction, returning its id
    fn submit(&self, tx: Transaction) -> Result<TxId, AdmissionError>;

    /// Confirmed balance of `address` in `asset`
    fn balance_of(&self, address: &str, asset: &str) -> u128;

    /// Current owner of a minted NFT
    fn nft_owner(&self, nft_id: &str) -> Option<Address>;

    /// Wall-clock time used for `created_at` (ms)
    fn now_millis(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Admitted-but-unconfirmed transactions in FIFO admission order.
///
/// Every entry holds a reservation on its sender's balance (amount + fee),
/// placed at admission and released when the transaction is executed,
/// cancelled or expired.
#[derive(Debug, Default)]
pub struct Mempool {
    queue: VecDeque<Transaction>,
    ids: HashSet<TxId>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate, price and reserve, then enqueue.
    ///
    /// SAFETY: On any error nothing is enqueued and every hold placed during
    /// this call is rolled back.
    pub fn submit(
        &mut self,
        mut tx: Transaction,
        ledger: &mut Ledger,
        fees: &FeeSchedule,
    ) -> Result<TxId, AdmissionError> {
        self.validate(&tx, ledger)?;

        tx.fee = fees
            .fee_for(tx.kind)
            .map_err(|e| AdmissionError::InvalidTransaction(e.to_string()))?;
        tx.status = TxStatus::Pending;

        let fee_asset = ledger.policy().fee_asset.clone();
        let debits = tx
            .debits(&fee_asset)
            .ok_or_else(|| AdmissionError::InvalidTransaction("amount + fee overflows".into()))?;

        let nft_lock = match tx.kind {
            TransactionType::NftTransfer => {
                let nft_id = tx
                    .nft_id()
                    .cloned()
                    .ok_or_else(|| AdmissionError::InvalidTransaction("missing nft_id".into()))?;
                ledger.reserve_nft(&tx.from, &nft_id)?;
                Some(nft_id)
            }
            _ => None,
        };

        let mut placed: Vec<(AssetId, u128)> = Vec::with_capacity(debits.len());
        for (asset, amount) in debits {
            if let Err(err) = ledger.reserve(&tx.from, &asset, amount) {
                for (held_asset, held_amount) in &placed {
                    ledger.release(&tx.from, held_asset, *held_amount);
                }
                if let Some(nft_id) = &nft_lock {
                    ledger.release_nft(nft_id);
                }
                debug!("Rejected {} from {}: {}", tx.id, tx.from, err);
                return Err(err.into());
            }
            placed.push((asset, amount));
        }

        let id = tx.id.clone();
        self.ids.insert(id.clone());
        self.queue.push_back(tx);
        debug!("Transaction {} admitted. Pool size: {}", id, self.queue.len());
        Ok(id)
    }

    /// Enqueue an engine-created issuance; it has no debit side to reserve
    pub fn admit_issuance(&mut self, mut tx: Transaction) -> Result<TxId, AdmissionError> {
        if tx.kind != TransactionType::Issuance {
            return Err(AdmissionError::InvalidTransaction(format!(
                "{} is not an issuance",
                tx.kind
            )));
        }
        if tx.to.is_empty() || tx.amount == 0 {
            return Err(AdmissionError::InvalidTransaction(
                "issuance needs a recipient and a nonzero amount".into(),
            ));
        }
        if self.ids.contains(&tx.id) {
            return Err(AdmissionError::Duplicate(tx.id));
        }
        tx.fee = 0;
        tx.status = TxStatus::Pending;
        let id = tx.id.clone();
        self.ids.insert(id.clone());
        self.queue.push_back(tx);
        Ok(id)
    }

    fn validate(&self, tx: &Transaction, ledger: &Ledger) -> Result<(), AdmissionError> {
        if tx.kind == TransactionType::Issuance {
            return Err(AdmissionError::InvalidTransaction(
                "issuance can only be created by the ledger engine".into(),
            ));
        }
        if tx.id.is_empty() {
            return Err(AdmissionError::InvalidTransaction("missing id".into()));
        }
        if self.ids.contains(&tx.id) {
            return Err(AdmissionError::Duplicate(tx.id.clone()));
        }
        if tx.from.is_empty() || tx.to.is_empty() {
            return Err(AdmissionError::InvalidTransaction(
                "missing sender or receiver".into(),
            ));
        }

        if tx.kind.is_nft() {
            if tx.asset != NFT_ASSET {
                return Err(AdmissionError::UnknownAsset(tx.asset.clone()));
            }
            if tx.amount != 0 {
                return Err(AdmissionError::InvalidTransaction(
                    "NFT transactions carry no fungible amount".into(),
                ));
            }
        } else if !ledger.policy().is_known(&tx.asset) {
            return Err(AdmissionError::UnknownAsset(tx.asset.clone()));
        }

        if tx.kind == TransactionType::NftMint {
            let token = tx.minted_token().ok_or_else(|| {
                AdmissionError::InvalidTransaction("mint lacks nft_id, name or rarity".into())
            })?;
            let pending_mint = self
                .queue
                .iter()
                .any(|p| p.kind == TransactionType::NftMint && p.nft_id() == Some(&token.id));
            if ledger.nft(&token.id).is_some() || pending_mint {
                return Err(AdmissionError::InvalidTransaction(format!(
                    "NFT {} already minted",
                    token.id
                )));
            }
        }

        if tx.kind.requires_amount() && tx.amount == 0 {
            return Err(AdmissionError::InvalidTransaction("zero amount".into()));
        }
        Ok(())
    }

    /// Remove and return every pending transaction in admission order.
    ///
    /// Reservations stay in place until the block is applied or the
    /// transactions are requeued.
    pub fn drain(&mut self) -> Vec<Transaction> {
        self.ids.clear();
        self.queue.drain(..).collect()
    }

    /// Return drained-but-unmined transactions to the head of the queue
    pub fn requeue_front(&mut self, txs: Vec<Transaction>) {
        for tx in txs.into_iter().rev() {
            if self.ids.insert(tx.id.clone()) {
                self.queue.push_front(tx);
            } else {
                warn!("Dropping duplicate requeue of {}", tx.id);
            }
        }
    }

    /// Drop the reservation of a drained transaction once it has executed
    pub fn release_for(&self, tx: &Transaction, ledger: &mut Ledger) {
        if self.ids.contains(&tx.id) {
            warn!("Releasing {} while it is still queued", tx.id);
        }
        ledger.release_transaction(tx);
    }

    /// Withdraw a pending transaction and release its reservation
    pub fn cancel(&mut self, tx_id: &str, ledger: &mut Ledger) -> Result<Transaction, MempoolError> {
        let position = self
            .queue
            .iter()
            .position(|tx| tx.id == tx_id)
            .ok_or_else(|| MempoolError::NotFound(tx_id.to_string()))?;
        let tx = self
            .queue
            .remove(position)
            .ok_or_else(|| MempoolError::NotFound(tx_id.to_string()))?;
        self.ids.remove(&tx.id);
        ledger.release_transaction(&tx);
        info!("Cancelled pending transaction {}", tx.id);
        Ok(tx)
    }

    /// Cancel every transaction created more than `ttl_ms` before `now_ms`
    pub fn prune_expired(&mut self, now_ms: u64, ttl_ms: u64, ledger: &mut Ledger) -> Vec<Transaction> {
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .queue
            .drain(..)
            .partition(|tx| tx.created_at.saturating_add(ttl_ms) < now_ms);
        self.queue = kept.into();
        for tx in &expired {
            self.ids.remove(&tx.id);
            ledger.release_transaction(tx);
        }
        if !expired.is_empty() {
            info!("Expired {} pending transactions", expired.len());
        }
        expired
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.ids.contains(tx_id)
    }

    pub fn get(&self, tx_id: &str) -> Option<&Transaction> {
        self.queue.iter().find(|tx| tx.id == tx_id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &Transaction> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetPolicy, META_NFT_ID, META_NFT_NAME, META_NFT_RARITY};
    use std::collections::BTreeMap;

    fn setup(balance: u128) -> (Mempool, Ledger, FeeSchedule) {
        let mut ledger = Ledger::new(AssetPolicy::new(vec!["LOYAL".into()], "OMNI", "sink"));
        let mut issue = Transaction::new(
            "genesis-0".into(),
            "mint",
            "alice",
            balance,
            "OMNI",
            TransactionType::Issuance,
            BTreeMap::new(),
            0,
        );
        issue.status = TxStatus::Confirmed;
        ledger.apply(&issue).unwrap();
        (Mempool::new(), ledger, FeeSchedule::default())
    }

    fn pay(id: &str, amount: u128) -> Transaction {
        Transaction::new(
            id.into(),
            "alice",
            "bob",
            amount,
            "OMNI",
            TransactionType::Payment,
            BTreeMap::new(),
            1_000,
        )
    }

    #[test]
    fn test_submit_reserves_amount_plus_fee() {
        let (mut pool, mut ledger, fees) = setup(1000);
        let id = pool.submit(pay("t1", 100), &mut ledger, &fees).unwrap();
        assert_eq!(id, "t1");
        assert_eq!(ledger.reserved("alice", "OMNI"), 101);
        assert_eq!(ledger.spendable("alice", "OMNI"), 899);
        assert_eq!(pool.get("t1").unwrap().fee, 1);
    }

    #[test]
    fn test_pending_reservations_block_double_spend() {
        let (mut pool, mut ledger, fees) = setup(150);
        pool.submit(pay("t1", 100), &mut ledger, &fees).unwrap();
        let err = pool.submit(pay("t2", 100), &mut ledger, &fees).unwrap_err();
        assert!(matches!(err, AdmissionError::InsufficientFunds(_)));
        assert_eq!(pool.len(), 1);
        assert_eq!(ledger.reserved("alice", "OMNI"), 101);
    }

    #[test]
    fn test_rejections_do_not_enqueue() {
        let (mut pool, mut ledger, fees) = setup(1000);
        assert!(matches!(
            pool.submit(pay("t1", 2000), &mut ledger, &fees),
            Err(AdmissionError::InsufficientFunds(_))
        ));

        let mut unknown = pay("t2", 10);
        unknown.asset = "DOGE".into();
        assert_eq!(
            pool.submit(unknown, &mut ledger, &fees),
            Err(AdmissionError::UnknownAsset("DOGE".into()))
        );

        assert!(matches!(
            pool.submit(pay("t3", 0), &mut ledger, &fees),
            Err(AdmissionError::InvalidTransaction(_))
        ));

        assert!(pool.is_empty());
        assert_eq!(ledger.reserved("alice", "OMNI"), 0);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (mut pool, mut ledger, fees) = setup(1000);
        pool.submit(pay("t1", 10), &mut ledger, &fees).unwrap();
        assert_eq!(
            pool.submit(pay("t1", 10), &mut ledger, &fees),
            Err(AdmissionError::Duplicate("t1".into()))
        );
    }

    #[test]
    fn test_failed_second_hold_rolls_back_first() {
        let (mut pool, mut ledger, _) = setup(0);
        let mut shop_funds = Transaction::new(
            "i-1".into(),
            "mint",
            "alice",
            50,
            "LOYAL",
            TransactionType::Issuance,
            BTreeMap::new(),
            0,
        );
        shop_funds.status = TxStatus::Confirmed;
        ledger.apply(&shop_funds).unwrap();

        let reward = Transaction::new(
            "r-1".into(),
            "alice",
            "bob",
            10,
            "LOYAL",
            TransactionType::LoyaltyReward,
            BTreeMap::new(),
            0,
        );
        // Base fee 2 gives a nonzero loyalty fee, and alice has no OMNI
        let fees = FeeSchedule::new(2);
        let err = pool.submit(reward, &mut ledger, &fees).unwrap_err();
        assert!(matches!(err, AdmissionError::InsufficientFunds(_)));
        assert_eq!(ledger.reserved("alice", "LOYAL"), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_issuance_rejected_on_public_path() {
        let (mut pool, mut ledger, fees) = setup(10);
        let mut issue = pay("i1", 10);
        issue.kind = TransactionType::Issuance;
        assert!(matches!(
            pool.submit(issue.clone(), &mut ledger, &fees),
            Err(AdmissionError::InvalidTransaction(_))
        ));
        assert_eq!(pool.admit_issuance(issue).unwrap(), "i1");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_drain_is_fifo_and_keeps_reservations() {
        let (mut pool, mut ledger, fees) = setup(1000);
        for i in 0..5 {
            pool.submit(pay(&format!("t{}", i), 10), &mut ledger, &fees).unwrap();
        }
        let drained = pool.drain();
        let ids: Vec<_> = drained.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t0", "t1", "t2", "t3", "t4"]);
        assert!(pool.is_empty());
        assert_eq!(ledger.reserved("alice", "OMNI"), 55);

        pool.submit(pay("late", 1), &mut ledger, &fees).unwrap();
        pool.requeue_front(drained);
        let order: Vec<_> = pool.pending().map(|t| t.id.as_str()).collect();
        assert_eq!(order, vec!["t0", "t1", "t2", "t3", "t4", "late"]);
    }

    #[test]
    fn test_cancel_releases_reservation() {
        let (mut pool, mut ledger, fees) = setup(1000);
        pool.submit(pay("t1", 100), &mut ledger, &fees).unwrap();
        let tx = pool.cancel("t1", &mut ledger).unwrap();
        assert_eq!(tx.id, "t1");
        assert_eq!(ledger.reserved("alice", "OMNI"), 0);
        assert!(!pool.contains("t1"));
        assert_eq!(
            pool.cancel("t1", &mut ledger),
            Err(MempoolError::NotFound("t1".into()))
        );
    }

    #[test]
    fn test_prune_expired() {
        let (mut pool, mut ledger, fees) = setup(1000);
        let mut old = pay("old", 10);
        old.created_at = 0;
        let mut fresh = pay("fresh", 10);
        fresh.created_at = 9_000;
        pool.submit(old, &mut ledger, &fees).unwrap();
        pool.submit(fresh, &mut ledger, &fees).unwrap();

        let expired = pool.prune_expired(10_000, 5_000, &mut ledger);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "old");
        assert_eq!(pool.len(), 1);
        assert_eq!(ledger.reserved("alice", "OMNI"), 11);
    }

    #[test]
    fn test_nft_transfer_locks_token() {
        let (mut pool, mut ledger, fees) = setup(100);
        let mut mint = Transaction::new(
            "m1".into(),
            "alice",
            "alice",
            0,
            NFT_ASSET,
            TransactionType::NftMint,
            BTreeMap::new(),
            0,
        );
        mint.metadata.insert(META_NFT_ID.into(), "nft-1".into());
        mint.metadata.insert(META_NFT_NAME.into(), "A".into());
        mint.metadata.insert(META_NFT_RARITY.into(), "common".into());
        ledger.apply(&mint).unwrap();

        let transfer = |id: &str, from: &str| {
            let mut t = Transaction::new(
                id.into(),
                from,
                "bob",
                0,
                NFT_ASSET,
                TransactionType::NftTransfer,
                BTreeMap::new(),
                0,
            );
            t.metadata.insert(META_NFT_ID.into(), "nft-1".into());
            t
        };

        assert!(matches!(
            pool.submit(transfer("x1", "carol"), &mut ledger, &fees),
            Err(AdmissionError::NotOwner { .. })
        ));
        pool.submit(transfer("x2", "alice"), &mut ledger, &fees).unwrap();
        assert_eq!(
            pool.submit(transfer("x3", "alice"), &mut ledger, &fees),
            Err(AdmissionError::NftLocked("nft-1".into()))
        );

        pool.cancel("x2", &mut ledger).unwrap();
        assert!(!ledger.is_nft_locked("nft-1"));
    }

    #[test]
    fn test_nft_kind_requires_marker_asset() {
        let (mut pool, mut ledger, fees) = setup(100);
        let mint = Transaction::new(
            "m1".into(),
            "alice",
            "alice",
            0,
            "OMNI",
            TransactionType::NftMint,
            BTreeMap::new(),
            0,
        );
        assert_eq!(
            pool.submit(mint, &mut ledger, &fees),
            Err(AdmissionError::UnknownAsset("OMNI".into()))
        );
    }

    fn mint(id: &str, nft_id: &str) -> Transaction {
        let mut t = Transaction::new(
            id.into(),
            "alice",
            "alice",
            0,
            NFT_ASSET,
            TransactionType::NftMint,
            BTreeMap::new(),
            0,
        );
        t.metadata.insert(META_NFT_ID.into(), nft_id.into());
        t.metadata.insert(META_NFT_NAME.into(), "A".into());
        t.metadata.insert(META_NFT_RARITY.into(), "common".into());
        t
    }

    #[test]
    fn test_malformed_mint_rejected_without_hold() {
        let (mut pool, mut ledger, fees) = setup(100);
        let mut bare = mint("m1", "nft-1");
        bare.metadata.clear();
        let mut bad_rarity = mint("m2", "nft-2");
        bad_rarity.metadata.insert(META_NFT_RARITY.into(), "mythic".into());

        for tx in [bare, bad_rarity] {
            assert!(matches!(
                pool.submit(tx, &mut ledger, &fees),
                Err(AdmissionError::InvalidTransaction(_))
            ));
        }
        assert!(pool.is_empty());
        assert_eq!(ledger.reserved("alice", "OMNI"), 0);
    }

    #[test]
    fn test_duplicate_mint_rejected() {
        let (mut pool, mut ledger, fees) = setup(100);
        pool.submit(mint("m1", "nft-1"), &mut ledger, &fees).unwrap();
        let held = ledger.reserved("alice", "OMNI");

        // Same token id while the first mint is still pending
        assert!(matches!(
            pool.submit(mint("m2", "nft-1"), &mut ledger, &fees),
            Err(AdmissionError::InvalidTransaction(_))
        ));

        // Same token id after it exists in the ledger
        let minted = pool.drain();
        ledger.apply(&minted[0]).unwrap();
        assert!(matches!(
            pool.submit(mint("m3", "nft-1"), &mut ledger, &fees),
            Err(AdmissionError::InvalidTransaction(_))
        ));
        assert_eq!(pool.len(), 0);
        assert_eq!(ledger.reserved("alice", "OMNI"), held);

        pool.submit(mint("m4", "nft-2"), &mut ledger, &fees).unwrap();
        assert_eq!(pool.len(), 1);
    }
}
