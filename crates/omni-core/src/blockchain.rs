//! Append-only hash-linked chain.
//!
//! SAFETY INVARIANTS:
//! 1. `blocks[i].index == i` and `blocks[i].previous_hash == blocks[i-1].hash`
//! 2. Every stored hash recomputes from block content and meets `difficulty`
//! 3. Blocks are only ever pushed at the tip, never removed or mutated
//! 4. Every recorded status equals the outcome of replaying the chain from genesis

use crate::asset::{Address, AssetPolicy};
use crate::block::{Block, BlockSummary, Hash};
use crate::block_validation::BlockValidator;
use crate::ledger::Ledger;
use crate::mempool::Mempool;
use crate::transaction::{Transaction, TxStatus};
use log::{error, info, warn};
use omni_economics::TransactionType;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Block {index} does not link to its parent: expected {expected}, found {found}")]
    BrokenLink { index: u64, expected: Hash, found: Hash },

    #[error("Block {index} misses difficulty {required} (found {found} leading zeros)")]
    BadDifficulty { index: u64, required: u8, found: u32 },

    #[error("Block {index} hash mismatch: stored {stored}, computed {computed}")]
    HashMismatch { index: u64, stored: Hash, computed: Hash },

    #[error("Bad block index: expected {expected}, found {found}")]
    BadIndex { expected: u64, found: u64 },

    #[error("Chain has no blocks")]
    EmptyChain,

    #[error("Replay of block {index} diverged at transaction {tx_id}: {reason}")]
    ReplayMismatch { index: u64, tx_id: String, reason: String },
}

/// Build the unsealed genesis candidate crediting each allocation.
///
/// Allocations become confirmed `Issuance` transactions with ids `genesis-<n>`.
pub fn genesis_candidate(allocations: &[(Address, String, u128)], timestamp: u64) -> Block {
    let transactions = allocations
        .iter()
        .enumerate()
        .map(|(n, (address, asset, amount))| {
            let mut tx = Transaction::new(
                format!("genesis-{}", n),
                "",
                address,
                *amount,
                asset,
                TransactionType::Issuance,
                BTreeMap::new(),
                timestamp,
            );
            tx.status = TxStatus::Confirmed;
            tx
        })
        .collect();
    Block::candidate(0, timestamp, transactions, Hash::ZERO)
}

#[derive(Debug, Clone)]
pub struct HashChain {
    blocks: Vec<Block>,
    difficulty: u8,
    tx_count: usize,
    policy: AssetPolicy,
}

impl HashChain {
    /// Start a chain from a sealed genesis block.
    ///
    /// `policy` is the asset policy the ledger executes blocks under; it is
    /// needed to re-derive recorded outcomes during verification.
    pub fn new(genesis: Block, difficulty: u8, policy: AssetPolicy) -> Result<Self, ChainError> {
        BlockValidator::validate_genesis(&genesis, difficulty)?;
        let tx_count = genesis.transactions.len();
        let chain = Self {
            blocks: vec![genesis],
            difficulty,
            tx_count,
            policy,
        };
        chain.verify_outcomes()?;
        Ok(chain)
    }

    /// Rebuild from persisted blocks, verifying every link and every recorded
    /// outcome on the way
    pub fn from_blocks(
        blocks: Vec<Block>,
        difficulty: u8,
        policy: AssetPolicy,
    ) -> Result<Self, ChainError> {
        let mut iter = blocks.into_iter();
        let genesis = iter.next().ok_or(ChainError::EmptyChain)?;
        BlockValidator::validate_genesis(&genesis, difficulty)?;
        let mut chain = Self {
            tx_count: genesis.transactions.len(),
            blocks: vec![genesis],
            difficulty,
            policy,
        };
        for block in iter {
            BlockValidator::validate_full_block(chain.tip(), &block, difficulty)?;
            chain.push(block);
        }
        chain.verify_outcomes()?;
        info!("Rebuilt chain with {} blocks", chain.len());
        Ok(chain)
    }

    pub fn tip(&self) -> &Block {
        // The constructor guarantees at least the genesis block
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn tx_count(&self) -> usize {
        self.tx_count
    }

    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    pub fn policy(&self) -> &AssetPolicy {
        &self.policy
    }

    /// Validate `block` against the tip, execute it and push it.
    ///
    /// SAFETY: A rejected block leaves chain and ledger untouched. On
    /// acceptance every transaction ends `Confirmed` or `Failed` and its
    /// reservation is released either way.
    pub fn append(
        &mut self,
        mut block: Block,
        ledger: &mut Ledger,
        mempool: &Mempool,
    ) -> Result<BlockSummary, ChainError> {
        BlockValidator::validate_full_block(self.tip(), &block, self.difficulty)?;

        for tx in block.transactions.iter_mut() {
            match ledger.apply(tx) {
                Ok(()) => tx.status = TxStatus::Confirmed,
                Err(err) => {
                    error!(
                        "Transaction {} failed in block {}: {}",
                        tx.id, block.index, err
                    );
                    tx.status = TxStatus::Failed;
                }
            }
            mempool.release_for(tx, ledger);
        }

        let summary = block.summary();
        self.push(block);
        info!(
            "Appended block {} ({} confirmed, {} failed) hash {}",
            summary.index, summary.confirmed, summary.failed, summary.hash
        );
        Ok(summary)
    }

    fn push(&mut self, block: Block) {
        self.tx_count += block.transactions.len();
        self.blocks.push(block);
    }

    /// Recompute every hash and link from genesis, then replay every block
    /// into a scratch ledger and compare the recorded outcomes
    pub fn verify_detailed(&self) -> Result<(), ChainError> {
        let genesis = self.blocks.first().ok_or(ChainError::EmptyChain)?;
        BlockValidator::validate_genesis(genesis, self.difficulty)?;
        for pair in self.blocks.windows(2) {
            BlockValidator::validate_full_block(&pair[0], &pair[1], self.difficulty)?;
        }
        self.verify_outcomes()
    }

    /// Status is outside the hash preimage, so it is checked by execution
    fn verify_outcomes(&self) -> Result<(), ChainError> {
        let mut scratch = Ledger::new(self.policy.clone());
        self.replay_into(0, &mut scratch)
    }

    pub fn verify(&self) -> bool {
        match self.verify_detailed() {
            Ok(()) => true,
            Err(err) => {
                warn!("Chain verification failed: {}", err);
                false
            }
        }
    }

    /// Re-execute every transaction of every block at `from_height` and above.
    ///
    /// `apply` is all-or-nothing, so a transaction recorded `Failed` must fail
    /// again without effect and one recorded `Confirmed` must succeed. Any
    /// other outcome means the ledger and the chain disagree.
    pub fn replay_into(&self, from_height: u64, ledger: &mut Ledger) -> Result<(), ChainError> {
        let start = usize::try_from(from_height).unwrap_or(usize::MAX);
        for block in self.blocks.iter().skip(start) {
            for tx in &block.transactions {
                let mismatch = |reason: String| ChainError::ReplayMismatch {
                    index: block.index,
                    tx_id: tx.id.clone(),
                    reason,
                };
                match (tx.status, ledger.apply(tx)) {
                    (TxStatus::Confirmed, Ok(())) | (TxStatus::Failed, Err(_)) => {}
                    (TxStatus::Confirmed, Err(err)) => {
                        return Err(mismatch(format!("recorded confirmed but fails: {}", err)))
                    }
                    (TxStatus::Failed, Ok(())) => {
                        return Err(mismatch("recorded failed but applies".to_string()))
                    }
                    (TxStatus::Pending, _) => {
                        return Err(mismatch("stored block holds a pending transaction".to_string()))
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetPolicy;
    use omni_economics::FeeSchedule;

    fn seal(mut block: Block, difficulty: u8) -> Block {
        let prefix = block.prefix_hasher();
        let mut nonce = 0u64;
        loop {
            let hash = Block::hash_with_nonce(&prefix, nonce);
            if hash.meets_difficulty(difficulty) {
                block.seal(nonce, hash);
                return block;
            }
            nonce += 1;
        }
    }

    fn setup() -> (HashChain, Ledger, Mempool) {
        let allocations = vec![("alice".to_string(), "OMNI".to_string(), 1_000u128)];
        let genesis = seal(genesis_candidate(&allocations, 1), 1);
        let chain = HashChain::new(genesis, 1, AssetPolicy::default()).unwrap();
        let mut ledger = Ledger::new(AssetPolicy::default());
        chain.replay_into(0, &mut ledger).unwrap();
        (chain, ledger, Mempool::new())
    }

    fn next_block(chain: &HashChain, txs: Vec<Transaction>) -> Block {
        let tip = chain.tip();
        seal(Block::candidate(tip.index + 1, tip.timestamp + 1, txs, tip.hash), chain.difficulty())
    }

    fn payment(id: &str, from: &str, to: &str, amount: u128) -> Transaction {
        Transaction::new(
            id.into(),
            from,
            to,
            amount,
            "OMNI",
            TransactionType::Payment,
            BTreeMap::new(),
            5,
        )
    }

    #[test]
    fn test_genesis_allocations_replay() {
        let (chain, ledger, _) = setup();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.tx_count(), 1);
        assert_eq!(ledger.get_balance("alice", "OMNI"), 1_000);
        assert_eq!(ledger.supply("OMNI"), 1_000);
        assert!(chain.verify());
    }

    #[test]
    fn test_append_confirms_and_releases() {
        let (mut chain, mut ledger, mut pool) = setup();
        let fees = FeeSchedule::default();
        pool.submit(payment("p1", "alice", "bob", 100), &mut ledger, &fees).unwrap();
        assert_eq!(ledger.reserved("alice", "OMNI"), 101);

        let block = next_block(&chain, pool.drain());
        let summary = chain.append(block, &mut ledger, &pool).unwrap();

        assert_eq!(summary.index, 1);
        assert_eq!(summary.confirmed, 1);
        assert_eq!(ledger.get_balance("alice", "OMNI"), 899);
        assert_eq!(ledger.get_balance("bob", "OMNI"), 100);
        assert_eq!(ledger.reserved("alice", "OMNI"), 0);
        assert_eq!(chain.tx_count(), 2);
        assert!(ledger.audit_supply().is_ok());
    }

    #[test]
    fn test_failed_transaction_stays_in_block() {
        let (mut chain, mut ledger, pool) = setup();
        // Bypasses admission: nothing was reserved for this one
        let overdraft = payment("p1", "bob", "alice", 50);
        let block = next_block(&chain, vec![overdraft]);
        let summary = chain.append(block, &mut ledger, &pool).unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(chain.tip().transactions[0].status, TxStatus::Failed);
        assert_eq!(ledger.get_balance("alice", "OMNI"), 1_000);
        assert!(chain.verify());
    }

    #[test]
    fn test_rejected_block_leaves_state_untouched() {
        let (mut chain, mut ledger, pool) = setup();
        let mut block = next_block(&chain, vec![payment("p1", "alice", "bob", 10)]);
        block.previous_hash = Hash([3u8; 32]);

        assert!(matches!(
            chain.append(block, &mut ledger, &pool),
            Err(ChainError::BrokenLink { .. })
        ));
        assert_eq!(chain.len(), 1);
        assert_eq!(ledger.get_balance("bob", "OMNI"), 0);
    }

    #[test]
    fn test_tampering_detected() {
        let (mut chain, mut ledger, pool) = setup();
        let block = next_block(&chain, vec![payment("p1", "alice", "bob", 10)]);
        chain.append(block, &mut ledger, &pool).unwrap();

        let mut blocks = chain.blocks().to_vec();
        blocks[1].transactions[0].amount = 999;
        let tampered = HashChain {
            blocks,
            difficulty: 1,
            tx_count: 0,
            policy: AssetPolicy::default(),
        };
        assert!(!tampered.verify());
        assert!(matches!(
            tampered.verify_detailed(),
            Err(ChainError::HashMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_flipped_status_detected() {
        let (mut chain, mut ledger, pool) = setup();
        let block = next_block(&chain, vec![payment("p1", "alice", "bob", 100)]);
        chain.append(block, &mut ledger, &pool).unwrap();
        assert!(chain.verify());

        let mut blocks = chain.blocks().to_vec();
        blocks[1].transactions[0].status = TxStatus::Failed;
        let flipped = HashChain {
            blocks: blocks.clone(),
            difficulty: 1,
            tx_count: 0,
            policy: AssetPolicy::default(),
        };
        assert!(!flipped.verify());
        assert!(matches!(
            flipped.verify_detailed(),
            Err(ChainError::ReplayMismatch { index: 1, .. })
        ));
        assert!(matches!(
            HashChain::from_blocks(blocks, 1, AssetPolicy::default()),
            Err(ChainError::ReplayMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_failed_recorded_as_confirmed_detected() {
        let (mut chain, mut ledger, pool) = setup();
        let block = next_block(&chain, vec![payment("p1", "bob", "alice", 50)]);
        chain.append(block, &mut ledger, &pool).unwrap();

        let mut blocks = chain.blocks().to_vec();
        blocks[1].transactions[0].status = TxStatus::Confirmed;
        let mut replayed = Ledger::new(AssetPolicy::default());
        let flipped = HashChain {
            blocks,
            difficulty: 1,
            tx_count: 0,
            policy: AssetPolicy::default(),
        };
        assert!(matches!(
            flipped.replay_into(0, &mut replayed),
            Err(ChainError::ReplayMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_from_blocks_and_replay_match_live_ledger() {
        let (mut chain, mut ledger, pool) = setup();
        for n in 0..3 {
            let block = next_block(&chain, vec![payment(&format!("p{}", n), "alice", "bob", 10)]);
            chain.append(block, &mut ledger, &pool).unwrap();
        }

        let rebuilt = HashChain::from_blocks(chain.blocks().to_vec(), 1, AssetPolicy::default()).unwrap();
        let mut replayed = Ledger::new(AssetPolicy::default());
        rebuilt.replay_into(0, &mut replayed).unwrap();
        assert_eq!(replayed.state(), ledger.state());
        assert_eq!(rebuilt.tx_count(), chain.tx_count());
    }

    #[test]
    fn test_from_blocks_rejects_empty() {
        assert_eq!(
            HashChain::from_blocks(Vec::new(), 1, AssetPolicy::default()).unwrap_err(),
            ChainError::EmptyChain
        );
    }
}
