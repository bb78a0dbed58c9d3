//! Wallet store: balances, reservations and NFT ownership.
//!
//! SAFETY INVARIANTS:
//! 1. Balances are unsigned and every debit is checked; no balance goes negative
//! 2. `apply` is the only operation that moves balances or NFT ownership
//! 3. `apply` is all-or-nothing: changes are staged and committed together
//! 4. Supply of an asset changes only through `Issuance`

use crate::asset::{Address, AssetId, AssetPolicy, NftId, NftToken};
use crate::transaction::Transaction;
use log::{debug, warn};
use omni_economics::TransactionType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Balances and collectibles held by one address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub address: Address,
    pub balances: BTreeMap<AssetId, u128>,
    pub owned_nfts: BTreeSet<NftId>,
}

impl Wallet {
    pub fn new(address: &str) -> Self {
        Wallet {
            address: address.to_string(),
            ..Default::default()
        }
    }

    pub fn balance(&self, asset: &str) -> u128 {
        self.balances.get(asset).copied().unwrap_or(0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Insufficient funds: {address} needs {requested} {asset}, spendable {spendable}")]
pub struct InsufficientFunds {
    pub address: Address,
    pub asset: AssetId,
    pub requested: u128,
    pub spendable: u128,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NftLockError {
    #[error("{address} does not own NFT {nft_id}")]
    NotOwner { address: Address, nft_id: NftId },
    #[error("NFT {0} already has a pending transfer")]
    Locked(NftId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("Insufficient balance: {address} holds {available} {asset}, debit {needed}")]
    Insufficient {
        address: Address,
        asset: AssetId,
        needed: u128,
        available: u128,
    },
    #[error("{address} does not own NFT {nft_id}")]
    NotOwner { address: Address, nft_id: NftId },
    #[error("Unknown NFT: {0}")]
    UnknownNft(NftId),
    #[error("Balance overflow on {asset} for {address}")]
    Overflow { address: Address, asset: AssetId },
    #[error("Malformed NFT transaction: {0}")]
    MalformedNft(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Supply mismatch for {asset}: recorded {supply}, held {circulating}")]
    SupplyMismatch {
        asset: AssetId,
        supply: u128,
        circulating: u128,
    },
}

/// Reservation-free persistent view of the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub wallets: BTreeMap<Address, Wallet>,
    pub nfts: BTreeMap<NftId, NftToken>,
    pub supply: BTreeMap<AssetId, u128>,
}

enum NftChange {
    Mint(NftToken),
    Transfer { nft_id: NftId, from: Address, to: Address },
}

/// Single source of truth for spendable funds
#[derive(Debug, Clone)]
pub struct Ledger {
    policy: AssetPolicy,
    wallets: HashMap<Address, Wallet>,
    reserved: HashMap<Address, BTreeMap<AssetId, u128>>,
    locked_nfts: HashMap<NftId, Address>,
    nfts: HashMap<NftId, NftToken>,
    supply: BTreeMap<AssetId, u128>,
}

impl Ledger {
    pub fn new(policy: AssetPolicy) -> Self {
        Ledger {
            policy,
            wallets: HashMap::new(),
            reserved: HashMap::new(),
            locked_nfts: HashMap::new(),
            nfts: HashMap::new(),
            supply: BTreeMap::new(),
        }
    }

    /// Rebuild from a persisted state; reservations start empty
    pub fn from_state(policy: AssetPolicy, state: LedgerState) -> Self {
        Ledger {
            policy,
            wallets: state.wallets.into_iter().collect(),
            reserved: HashMap::new(),
            locked_nfts: HashMap::new(),
            nfts: state.nfts.into_iter().collect(),
            supply: state.supply,
        }
    }

    pub fn state(&self) -> LedgerState {
        LedgerState {
            wallets: self
                .wallets
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            nfts: self.nfts.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            supply: self.supply.clone(),
        }
    }

    pub fn policy(&self) -> &AssetPolicy {
        &self.policy
    }

    /// Register an empty wallet if the address is new
    pub fn create_wallet(&mut self, address: &str) -> &Wallet {
        self.wallets
            .entry(address.to_string())
            .or_insert_with(|| Wallet::new(address))
    }

    pub fn wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    pub fn get_balance(&self, address: &str, asset: &str) -> u128 {
        self.wallets
            .get(address)
            .map(|w| w.balance(asset))
            .unwrap_or(0)
    }

    pub fn reserved(&self, address: &str, asset: &str) -> u128 {
        self.reserved
            .get(address)
            .and_then(|r| r.get(asset))
            .copied()
            .unwrap_or(0)
    }

    /// All holds currently placed on `address`
    pub fn reservations(&self, address: &str) -> BTreeMap<AssetId, u128> {
        self.reserved.get(address).cloned().unwrap_or_default()
    }

    /// Balance minus currently reserved amounts
    pub fn spendable(&self, address: &str, asset: &str) -> u128 {
        self.get_balance(address, asset)
            .saturating_sub(self.reserved(address, asset))
    }

    /// Place a hold of `amount` if it fits in the spendable balance
    pub fn reserve(&mut self, address: &str, asset: &str, amount: u128) -> Result<(), InsufficientFunds> {
        let spendable = self.spendable(address, asset);
        if amount > spendable {
            return Err(InsufficientFunds {
                address: address.to_string(),
                asset: asset.to_string(),
                requested: amount,
                spendable,
            });
        }
        if amount == 0 {
            return Ok(());
        }

        let held = self
            .reserved
            .entry(address.to_string())
            .or_default()
            .entry(asset.to_string())
            .or_insert(0);
        // Bounded by the balance, so this cannot overflow
        *held += amount;
        Ok(())
    }

    /// Drop a hold; releasing more than is held clamps to zero
    pub fn release(&mut self, address: &str, asset: &str, amount: u128) {
        let Some(holds) = self.reserved.get_mut(address) else {
            return;
        };
        if let Some(held) = holds.get_mut(asset) {
            if amount > *held {
                warn!(
                    "Releasing {} {} for {} but only {} reserved",
                    amount, asset, address, held
                );
            }
            *held = held.saturating_sub(amount);
            if *held == 0 {
                holds.remove(asset);
            }
        }
        if holds.is_empty() {
            self.reserved.remove(address);
        }
    }

    /// Lock an NFT against a second pending transfer
    pub fn reserve_nft(&mut self, address: &str, nft_id: &str) -> Result<(), NftLockError> {
        if self.nft_owner(nft_id) != Some(address) {
            return Err(NftLockError::NotOwner {
                address: address.to_string(),
                nft_id: nft_id.to_string(),
            });
        }
        if self.locked_nfts.contains_key(nft_id) {
            return Err(NftLockError::Locked(nft_id.to_string()));
        }
        self.locked_nfts.insert(nft_id.to_string(), address.to_string());
        Ok(())
    }

    pub fn release_nft(&mut self, nft_id: &str) {
        self.locked_nfts.remove(nft_id);
    }

    pub fn is_nft_locked(&self, nft_id: &str) -> bool {
        self.locked_nfts.contains_key(nft_id)
    }

    /// Drop every hold a transaction placed at admission
    pub fn release_transaction(&mut self, tx: &Transaction) {
        if let Some(debits) = tx.debits(&self.policy.fee_asset) {
            for (asset, amount) in debits {
                self.release(&tx.from, &asset, amount);
            }
        }
        if tx.kind == TransactionType::NftTransfer {
            if let Some(nft_id) = tx.nft_id() {
                if self.locked_nfts.get(nft_id) == Some(&tx.from) {
                    self.locked_nfts.remove(nft_id);
                }
            }
        }
    }

    pub fn nft(&self, nft_id: &str) -> Option<&NftToken> {
        self.nfts.get(nft_id)
    }

    pub fn nft_owner(&self, nft_id: &str) -> Option<&str> {
        self.nfts.get(nft_id).map(|t| t.owner.as_str())
    }

    pub fn supply(&self, asset: &str) -> u128 {
        self.supply.get(asset).copied().unwrap_or(0)
    }

    /// Move balances and ownership for one transaction.
    ///
    /// SAFETY: Sufficiency is re-checked here against the raw balance,
    /// independent of reservations. Nothing is written unless every check passes.
    pub fn apply(&mut self, tx: &Transaction) -> Result<(), ApplyError> {
        let fee_asset = self.policy.fee_asset.clone();
        let fee_sink = self.policy.fee_sink.clone();
        let mut staged: BTreeMap<(Address, AssetId), u128> = BTreeMap::new();

        let debits = tx.debits(&fee_asset).ok_or_else(|| ApplyError::Overflow {
            address: tx.from.clone(),
            asset: tx.asset.clone(),
        })?;
        for (asset, amount) in &debits {
            self.stage_debit(&mut staged, &tx.from, asset, *amount)?;
        }

        if tx.amount > 0 && !tx.kind.is_nft() {
            self.stage_credit(&mut staged, &tx.to, &tx.asset, tx.amount)?;
        }
        if tx.fee > 0 && tx.kind != TransactionType::Issuance {
            self.stage_credit(&mut staged, &fee_sink, &fee_asset, tx.fee)?;
        }

        let new_supply = if tx.kind == TransactionType::Issuance {
            let supply = self
                .supply(&tx.asset)
                .checked_add(tx.amount)
                .ok_or_else(|| ApplyError::Overflow {
                    address: tx.to.clone(),
                    asset: tx.asset.clone(),
                })?;
            Some(supply)
        } else {
            None
        };

        let nft_change = match tx.kind {
            TransactionType::NftMint => {
                let token = tx.minted_token().ok_or_else(|| {
                    ApplyError::MalformedNft(format!("mint {} lacks token fields", tx.id))
                })?;
                if self.nfts.contains_key(&token.id) {
                    return Err(ApplyError::MalformedNft(format!(
                        "NFT {} already minted",
                        token.id
                    )));
                }
                Some(NftChange::Mint(token))
            }
            TransactionType::NftTransfer => {
                let nft_id = tx.nft_id().ok_or_else(|| {
                    ApplyError::MalformedNft(format!("transfer {} lacks nft_id", tx.id))
                })?;
                let owner = self
                    .nft_owner(nft_id)
                    .ok_or_else(|| ApplyError::UnknownNft(nft_id.clone()))?;
                if owner != tx.from {
                    return Err(ApplyError::NotOwner {
                        address: tx.from.clone(),
                        nft_id: nft_id.clone(),
                    });
                }
                Some(NftChange::Transfer {
                    nft_id: nft_id.clone(),
                    from: tx.from.clone(),
                    to: tx.to.clone(),
                })
            }
            _ => None,
        };

        // Commit
        for ((address, asset), balance) in staged {
            let wallet = self
                .wallets
                .entry(address.clone())
                .or_insert_with(|| Wallet::new(&address));
            wallet.balances.insert(asset, balance);
        }
        if let Some(supply) = new_supply {
            self.supply.insert(tx.asset.clone(), supply);
        }
        match nft_change {
            Some(NftChange::Mint(token)) => {
                self.wallets
                    .entry(token.owner.clone())
                    .or_insert_with(|| Wallet::new(&token.owner))
                    .owned_nfts
                    .insert(token.id.clone());
                debug!("Minted NFT {} ({}) for {}", token.id, token.rarity, token.owner);
                self.nfts.insert(token.id.clone(), token);
            }
            Some(NftChange::Transfer { nft_id, from, to }) => {
                if let Some(wallet) = self.wallets.get_mut(&from) {
                    wallet.owned_nfts.remove(&nft_id);
                }
                self.wallets
                    .entry(to.clone())
                    .or_insert_with(|| Wallet::new(&to))
                    .owned_nfts
                    .insert(nft_id.clone());
                if let Some(token) = self.nfts.get_mut(&nft_id) {
                    token.owner = to;
                }
            }
            None => {}
        }

        Ok(())
    }

    fn stage_debit(
        &self,
        staged: &mut BTreeMap<(Address, AssetId), u128>,
        address: &str,
        asset: &str,
        amount: u128,
    ) -> Result<(), ApplyError> {
        let key = (address.to_string(), asset.to_string());
        let current = staged
            .get(&key)
            .copied()
            .unwrap_or_else(|| self.get_balance(address, asset));
        let next = current.checked_sub(amount).ok_or_else(|| ApplyError::Insufficient {
            address: address.to_string(),
            asset: asset.to_string(),
            needed: amount,
            available: current,
        })?;
        staged.insert(key, next);
        Ok(())
    }

    fn stage_credit(
        &self,
        staged: &mut BTreeMap<(Address, AssetId), u128>,
        address: &str,
        asset: &str,
        amount: u128,
    ) -> Result<(), ApplyError> {
        let key = (address.to_string(), asset.to_string());
        let current = staged
            .get(&key)
            .copied()
            .unwrap_or_else(|| self.get_balance(address, asset));
        let next = current.checked_add(amount).ok_or_else(|| ApplyError::Overflow {
            address: address.to_string(),
            asset: asset.to_string(),
        })?;
        staged.insert(key, next);
        Ok(())
    }

    /// Check that every asset's recorded supply equals what wallets hold
    pub fn audit_supply(&self) -> Result<(), LedgerError> {
        let mut circulating: BTreeMap<&str, u128> = BTreeMap::new();
        for wallet in self.wallets.values() {
            for (asset, balance) in &wallet.balances {
                let total = circulating.entry(asset.as_str()).or_insert(0);
                *total = total.saturating_add(*balance);
            }
        }

        let assets: BTreeSet<&str> = circulating
            .keys()
            .copied()
            .chain(self.supply.keys().map(String::as_str))
            .collect();
        for asset in assets {
            let supply = self.supply(asset);
            let held = circulating.get(asset).copied().unwrap_or(0);
            if supply != held {
                return Err(LedgerError::SupplyMismatch {
                    asset: asset.to_string(),
                    supply,
                    circulating: held,
                });
            }
        }
        Ok(())
    }
}
