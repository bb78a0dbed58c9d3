//! The ledger engine: one owned aggregate holding chain, mempool and ledger.
//!
//! SAFETY INVARIANTS:
//! 1. Locks are always taken in the order chain -> mempool -> ledger -> storage
//! 2. Admission holds mempool + ledger across check, reserve and enqueue
//! 3. Only one mining round runs at a time (`mining` guard)
//! 4. No lock is held during the nonce search
//! 5. A block reaches the log only after the in-memory append succeeded

use crate::api::{ChainStats, MineOutcome, TxRequest, WalletView};
use crate::config::{ConfigError, EngineConfig};
use omni_consensus::{CancelToken, ProofOfWork};
use omni_core::{
    genesis_candidate, AdmissionError, Address, Block, ChainError, HashChain, Ledger, LedgerError,
    Mempool, MempoolError, NftToken, Transaction, TransactionSubmitter, TransactionType, TxId,
    META_NFT_ID, META_NFT_NAME,
};
use omni_economics::FeeSchedule;
use omni_governance::governance_voting::{META_DESCRIPTION, META_PROPOSAL_ID, META_TITLE, META_VOTE};
use omni_governance::{GovernanceError, GovernanceStub, ProposalReceipt, VoteChoice};
use omni_pat::{new_tx_id, AssetOps, MintReceipt};
use omni_state::{
    BlockLog, LedgerSnapshot, SnapshotStore, StorageError, BLOCK_LOG_FILE, SNAPSHOT_FILE,
};
use omni_wallet_core::WalletKeys;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error(transparent)]
    Mempool(#[from] MempoolError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Mining round cancelled")]
    Cancelled,
}

struct Storage {
    log: BlockLog,
    snapshots: SnapshotStore,
}

pub struct LedgerEngine {
    config: EngineConfig,
    fees: FeeSchedule,
    pow: ProofOfWork,
    chain: RwLock<HashChain>,
    mempool: Mutex<Mempool>,
    ledger: RwLock<Ledger>,
    storage: Option<Mutex<Storage>>,
    mining: Mutex<()>,
    rng: Mutex<StdRng>,
}

impl LedgerEngine {
    /// Build the engine from configuration, restoring persisted state when a
    /// `data_dir` is configured.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let fees = config.fee_schedule();
        let pow = ProofOfWork::new(config.mining_check_interval);
        let genesis = genesis_candidate(&config.allocations(), config.genesis_timestamp);

        let (chain, ledger, storage) = match &config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(StorageError::from)?;
                let (mut log, blocks) = BlockLog::open(dir.join(BLOCK_LOG_FILE))?;
                let snapshots = SnapshotStore::new(dir.join(SNAPSHOT_FILE));

                let chain = if blocks.is_empty() {
                    let sealed = pow.seal_genesis(
                        &config.allocations(),
                        config.genesis_timestamp,
                        config.difficulty,
                    );
                    log.append(&sealed)?;
                    HashChain::new(sealed, config.difficulty, config.asset_policy())?
                } else {
                    let logged = &blocks[0];
                    if logged.timestamp != genesis.timestamp
                        || logged.transactions != genesis.transactions
                    {
                        return Err(ConfigError::Invalid(format!(
                            "genesis in {} does not match the configured allocations",
                            dir.display()
                        ))
                        .into());
                    }
                    HashChain::from_blocks(blocks, config.difficulty, config.asset_policy())?
                };

                let ledger = restore_ledger(&config, &chain, &snapshots)?;
                (chain, ledger, Some(Mutex::new(Storage { log, snapshots })))
            }
            None => {
                let sealed = pow.seal_genesis(
                    &config.allocations(),
                    config.genesis_timestamp,
                    config.difficulty,
                );
                let chain = HashChain::new(sealed, config.difficulty, config.asset_policy())?;
                let mut ledger = Ledger::new(config.asset_policy());
                chain.replay_into(0, &mut ledger)?;
                (chain, ledger, None)
            }
        };

        ledger.audit_supply()?;
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            "Ledger engine ready: {} blocks, tip {}, difficulty {}",
            chain.len(),
            chain.tip().hash,
            config.difficulty
        );

        Ok(Self {
            config,
            fees,
            pow,
            chain: RwLock::new(chain),
            mempool: Mutex::new(Mempool::new()),
            ledger: RwLock::new(ledger),
            storage,
            mining: Mutex::new(()),
            rng: Mutex::new(rng),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Translate a request into a transaction and admit it
    pub fn submit_transaction(&self, request: TxRequest) -> Result<TxId, EngineError> {
        let TxRequest {
            kind,
            from,
            to,
            amount,
            asset,
            mut metadata,
        } = request;

        match kind {
            TransactionType::Payment
            | TransactionType::Reservation
            | TransactionType::LoyaltyReward => {
                Ok(self.assets().pay(&from, &to, amount, &asset, kind, metadata)?)
            }
            TransactionType::NftMint => {
                let name = metadata
                    .remove(META_NFT_NAME)
                    .ok_or_else(|| EngineError::InvalidRequest("NftMint needs metadata.name".into()))?;
                Ok(self.mint_nft(&from, &name, metadata)?.tx_id)
            }
            TransactionType::NftTransfer => {
                let nft_id = metadata.get(META_NFT_ID).ok_or_else(|| {
                    EngineError::InvalidRequest("NftTransfer needs metadata.nft_id".into())
                })?;
                Ok(self.assets().transfer_nft(&from, &to, nft_id)?)
            }
            TransactionType::GovernanceRecord => {
                let governance = self.governance();
                match (metadata.get(META_PROPOSAL_ID), metadata.get(META_VOTE)) {
                    (Some(proposal_id), Some(vote)) => {
                        let choice: VoteChoice = vote.parse()?;
                        Ok(governance.record_vote(&from, proposal_id, choice)?)
                    }
                    _ => {
                        let title = metadata.get(META_TITLE).ok_or_else(|| {
                            EngineError::InvalidRequest(
                                "GovernanceRecord needs proposal_id + vote, or title".into(),
                            )
                        })?;
                        let description = metadata.get(META_DESCRIPTION).cloned().unwrap_or_default();
                        Ok(governance.record_proposal(&from, title, &description)?.tx_id)
                    }
                }
            }
            TransactionType::Issuance => Err(EngineError::InvalidRequest(
                "issuance is created through issue()".into(),
            )),
        }
    }

    /// Payment, NFT and loyalty operations bound to this engine
    pub fn assets(&self) -> AssetOps<'_, Self> {
        AssetOps::new(self)
    }

    pub fn governance(&self) -> GovernanceStub<'_, Self> {
        GovernanceStub::new(self, self.config.governance())
    }

    /// Mint with the engine's (optionally seeded) random source
    pub fn mint_nft(
        &self,
        creator: &str,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<MintReceipt, EngineError> {
        let mut rng = self.rng.lock();
        Ok(self.assets().mint_nft(creator, name, metadata, &mut *rng)?)
    }

    pub fn record_proposal(
        &self,
        proposer: &str,
        title: &str,
        description: &str,
    ) -> Result<ProposalReceipt, EngineError> {
        Ok(self.governance().record_proposal(proposer, title, description)?)
    }

    /// Credit new supply of a known asset; confirmed with the next block
    pub fn issue(&self, address: &str, asset: &str, amount: u128) -> Result<TxId, EngineError> {
        if !self.config.known_assets.iter().any(|a| a == asset) {
            return Err(AdmissionError::UnknownAsset(asset.to_string()).into());
        }
        let tx = Transaction::new(
            new_tx_id(),
            "",
            address,
            amount,
            asset,
            TransactionType::Issuance,
            BTreeMap::new(),
            self.now_millis(),
        );
        let id = self.mempool.lock().admit_issuance(tx)?;
        info!("Queued issuance of {} {} to {}", amount, asset, address);
        Ok(id)
    }

    /// Mine everything pending into one block. Blocks the calling thread.
    pub fn mine_pending(&self) -> Result<MineOutcome, EngineError> {
        self.mine_pending_cancellable(&CancelToken::new())
    }

    /// Like `mine_pending`; a tripped `token` abandons the round and puts
    /// every drained transaction back at the head of the mempool.
    pub fn mine_pending_cancellable(&self, token: &CancelToken) -> Result<MineOutcome, EngineError> {
        let _round = self.mining.lock();
        let span = info_span!("mine_round");
        let _entered = span.enter();

        let (pending, prev) = {
            let chain = self.chain.read();
            let mut pool = self.mempool.lock();
            if pool.is_empty() {
                return Ok(MineOutcome::NothingToMine);
            }
            (pool.drain(), chain.tip().clone())
        };
        debug!("Mining {} transactions on top of block {}", pending.len(), prev.index);

        let block = match self.pow.mine_cancellable(
            pending.clone(),
            &prev,
            self.config.difficulty,
            token,
        ) {
            Some(block) => block,
            None => {
                self.mempool.lock().requeue_front(pending);
                warn!("Mining round abandoned; transactions requeued");
                return Err(EngineError::Cancelled);
            }
        };

        let mut chain = self.chain.write();
        let mut pool = self.mempool.lock();
        let mut ledger = self.ledger.write();

        let summary = match chain.append(block, &mut ledger, &pool) {
            Ok(summary) => summary,
            Err(err) => {
                error!("Mined block rejected: {}", err);
                pool.requeue_front(pending);
                return Err(err.into());
            }
        };

        if let Some(storage) = &self.storage {
            let mut storage = storage.lock();
            storage.log.append(chain.tip())?;
            if summary.index % self.config.snapshot_interval == 0 {
                storage.snapshots.save(&LedgerSnapshot {
                    height: summary.index,
                    tip_hash: summary.hash,
                    state: ledger.state(),
                })?;
            }
        }

        Ok(MineOutcome::Mined(summary))
    }

    pub fn get_wallet(&self, address: &str) -> WalletView {
        let ledger = self.ledger.read();
        let mut view = match ledger.wallet(address) {
            Some(wallet) => WalletView {
                address: wallet.address.clone(),
                balances: wallet.balances.clone(),
                owned_nfts: wallet.owned_nfts.clone(),
                reserved: BTreeMap::new(),
            },
            None => WalletView {
                address: address.to_string(),
                ..Default::default()
            },
        };
        view.reserved = ledger.reservations(address);
        view
    }

    pub fn get_chain_stats(&self) -> ChainStats {
        let chain = self.chain.read();
        let pending_count = self.mempool.lock().len();
        ChainStats {
            block_count: chain.len(),
            tx_count: chain.tx_count(),
            pending_count,
            last_hash: chain.tip().hash,
            difficulty: chain.difficulty(),
        }
    }

    pub fn verify_chain(&self) -> bool {
        self.chain.read().verify()
    }

    /// Generate keys and register an empty wallet for the new address
    pub fn create_wallet(&self) -> WalletKeys {
        let keys = WalletKeys::generate(&mut *self.rng.lock());
        self.ledger.write().create_wallet(keys.address());
        info!("Created wallet {}", keys.address());
        keys
    }

    /// Withdraw a pending transaction and release its holds
    pub fn cancel_transaction(&self, tx_id: &str) -> Result<Transaction, EngineError> {
        let mut pool = self.mempool.lock();
        let mut ledger = self.ledger.write();
        Ok(pool.cancel(tx_id, &mut ledger)?)
    }

    /// Drop pending transactions older than the configured TTL
    pub fn prune_mempool(&self) -> Vec<Transaction> {
        let now = self.now_millis();
        let mut pool = self.mempool.lock();
        let mut ledger = self.ledger.write();
        pool.prune_expired(now, self.config.mempool_ttl_ms(), &mut ledger)
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.mempool.lock().pending().cloned().collect()
    }

    pub fn nft(&self, nft_id: &str) -> Option<NftToken> {
        self.ledger.read().nft(nft_id).cloned()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        self.chain.read().get(index).cloned()
    }

    /// Conservation check over every asset
    pub fn audit(&self) -> Result<(), EngineError> {
        Ok(self.ledger.read().audit_supply()?)
    }
}

impl TransactionSubmitter for LedgerEngine {
    fn submit(&self, tx: Transaction) -> Result<TxId, AdmissionError> {
        let mut pool = self.mempool.lock();
        let mut ledger = self.ledger.write();
        pool.submit(tx, &mut ledger, &self.fees)
    }

    fn balance_of(&self, address: &str, asset: &str) -> u128 {
        self.ledger.read().get_balance(address, asset)
    }

    fn nft_owner(&self, nft_id: &str) -> Option<Address> {
        self.ledger.read().nft_owner(nft_id).map(str::to_string)
    }
}

/// Start from the newest usable snapshot, or replay from genesis
fn restore_ledger(
    config: &EngineConfig,
    chain: &HashChain,
    snapshots: &SnapshotStore,
) -> Result<Ledger, EngineError> {
    let snapshot = match snapshots.load() {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!("Ignoring unreadable snapshot: {}", err);
            None
        }
    };

    if let Some(snapshot) = snapshot {
        let matches = chain
            .get(snapshot.height)
            .map(|block| block.hash == snapshot.tip_hash)
            .unwrap_or(false);
        if matches {
            let mut ledger = Ledger::from_state(config.asset_policy(), snapshot.state);
            chain.replay_into(snapshot.height + 1, &mut ledger)?;
            info!(
                "Restored ledger from snapshot at height {}, replayed {} blocks",
                snapshot.height,
                chain.len() as u64 - snapshot.height - 1
            );
            return Ok(ledger);
        }
        warn!(
            "Snapshot at height {} does not match the block log; replaying from genesis",
            snapshot.height
        );
    }

    let mut ledger = Ledger::new(config.asset_policy());
    chain.replay_into(0, &mut ledger)?;
    Ok(ledger)
}
