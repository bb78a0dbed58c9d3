// PROOF-OF-WORK BLOCK SEALING
// Nonce search over the canonical block encoding
//
// SAFETY CONSTRAINTS:
// 1. The miner never touches ledger or chain state; it only produces blocks
// 2. Transaction order in the candidate is the order handed in
// 3. A sealed block's hash always recomputes from its content
// 4. A cancelled search returns nothing and has no side effects

use log::{debug, info, warn};
use omni_core::{genesis_candidate, Address, Block, Transaction};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Nonces tried between two looks at the cancel flag
pub const DEFAULT_CHECK_INTERVAL: u64 = 4_096;

/// Shared flag that abandons a running nonce search
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can guard the next round
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Proof-of-work sealer.
///
/// SAFETY: Pure CPU work. Expected cost is `16^difficulty` hashes.
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    /// Nonces tried between cancellation checks
    check_interval: u64,

    /// Last nonce tried before the timestamp is refreshed
    max_nonce: u64,
}

impl Default for ProofOfWork {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_INTERVAL)
    }
}

impl ProofOfWork {
    pub fn new(check_interval: u64) -> Self {
        ProofOfWork {
            check_interval: check_interval.max(1),
            max_nonce: u64::MAX,
        }
    }

    /// Bound the nonce space; once exhausted the timestamp is refreshed
    pub fn with_max_nonce(mut self, max_nonce: u64) -> Self {
        self.max_nonce = max_nonce;
        self
    }

    pub fn check_interval(&self) -> u64 {
        self.check_interval
    }

    /// Seal `pending` on top of `prev`. Runs until a nonce is found.
    pub fn mine(&self, pending: Vec<Transaction>, prev: &Block, difficulty: u8) -> Block {
        let candidate = Self::candidate(pending, prev);
        match self.search(candidate, difficulty, || Ok::<(), Infallible>(())) {
            Ok(block) => block,
            Err(never) => match never {},
        }
    }

    /// Like `mine`, but gives up once `token` is cancelled.
    ///
    /// `None` means the round was abandoned; nothing was produced.
    pub fn mine_cancellable(
        &self,
        pending: Vec<Transaction>,
        prev: &Block,
        difficulty: u8,
        token: &CancelToken,
    ) -> Option<Block> {
        let candidate = Self::candidate(pending, prev);
        self.search(candidate, difficulty, || {
            if token.is_cancelled() {
                Err(Cancelled)
            } else {
                Ok(())
            }
        })
        .ok()
    }

    /// Mine the genesis block crediting each allocation
    pub fn seal_genesis(&self, allocations: &[(Address, String, u128)], timestamp: u64, difficulty: u8) -> Block {
        let candidate = genesis_candidate(allocations, timestamp);
        match self.search(candidate, difficulty, || Ok::<(), Infallible>(())) {
            Ok(block) => block,
            Err(never) => match never {},
        }
    }

    fn candidate(pending: Vec<Transaction>, prev: &Block) -> Block {
        let timestamp = now_millis().max(prev.timestamp);
        Block::candidate(prev.index + 1, timestamp, pending, prev.hash)
    }

    /// Nonce search; `checkpoint` runs every `check_interval` nonces and its
    /// error ends the search
    fn search<E>(
        &self,
        mut block: Block,
        difficulty: u8,
        checkpoint: impl Fn() -> Result<(), E>,
    ) -> Result<Block, E> {
        let started = std::time::Instant::now();
        let mut attempts: u64 = 0;

        loop {
            let prefix = block.prefix_hasher();
            let mut nonce: u64 = 0;
            loop {
                if nonce % self.check_interval == 0 {
                    if let Err(stop) = checkpoint() {
                        debug!(
                            "PoW search for block {} stopped after {} attempts",
                            block.index, attempts
                        );
                        return Err(stop);
                    }
                }

                let hash = Block::hash_with_nonce(&prefix, nonce);
                attempts += 1;
                if hash.meets_difficulty(difficulty) {
                    block.seal(nonce, hash);
                    info!(
                        "PoW found: block={}, difficulty={}, nonce={}, attempts={}, elapsed={:?}",
                        block.index,
                        difficulty,
                        nonce,
                        attempts,
                        started.elapsed()
                    );
                    return Ok(block);
                }

                if nonce == self.max_nonce {
                    break;
                }
                nonce += 1;
            }

            // Nonce space exhausted: move the timestamp and start over
            let refreshed = now_millis().max(block.timestamp + 1);
            warn!(
                "Nonce space exhausted for block {}, refreshing timestamp {} -> {}",
                block.index, block.timestamp, refreshed
            );
            block.timestamp = refreshed;
        }
    }
}

/// Stop signal of a cancelled search
struct Cancelled;

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_core::{AssetPolicy, Hash, HashChain};
    use omni_economics::TransactionType;
    use std::collections::BTreeMap;

    fn payment(id: &str) -> Transaction {
        Transaction::new(
            id.into(),
            "alice",
            "bob",
            5,
            "OMNI",
            TransactionType::Payment,
            BTreeMap::new(),
            1,
        )
    }

    #[test]
    fn test_pow_compute_easy_difficulty() {
        let pow = ProofOfWork::default();
        let genesis = pow.seal_genesis(&[], 1, 1);
        let block = pow.mine(vec![payment("a"), payment("b")], &genesis, 2);

        assert!(block.hash.to_hex().starts_with("00"));
        assert_eq!(block.hash, block.compute_hash());
        assert_eq!(block.index, 1);
        assert_eq!(block.previous_hash, genesis.hash);
        let ids: Vec<_> = block.transactions.iter().map(|tx| tx.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_sealed_blocks_extend_chain() {
        let pow = ProofOfWork::default();
        let genesis = pow.seal_genesis(&[("alice".into(), "OMNI".into(), 50)], 1, 1);
        assert_eq!(genesis.previous_hash, Hash::ZERO);
        let chain = HashChain::new(genesis, 1, AssetPolicy::default()).unwrap();
        assert!(chain.verify());
        assert_eq!(chain.tip().transactions[0].id, "genesis-0");
    }

    #[test]
    fn test_cancelled_search_returns_none() {
        let pow = ProofOfWork::new(1);
        let genesis = pow.seal_genesis(&[], 1, 0);
        let token = CancelToken::new();
        token.cancel();

        // Difficulty 64 is out of reach; only cancellation can end this
        assert!(pow.mine_cancellable(vec![payment("a")], &genesis, 64, &token).is_none());

        token.reset();
        assert!(!token.is_cancelled());
        assert!(pow.mine_cancellable(vec![payment("a")], &genesis, 1, &token).is_some());
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let pow = ProofOfWork::new(16);
        let genesis = pow.seal_genesis(&[], 1, 0);
        let token = CancelToken::new();

        let remote = token.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            remote.cancel();
        });
        let result = pow.mine_cancellable(vec![payment("a")], &genesis, 64, &token);
        canceller.join().unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_exhausted_nonce_space_refreshes_timestamp() {
        // A single nonce per timestamp forces a refresh on nearly every try
        let pow = ProofOfWork::default().with_max_nonce(0);
        let genesis = ProofOfWork::default().seal_genesis(&[], 1, 0);
        let block = pow.mine(vec![payment("a")], &genesis, 1);

        assert_eq!(block.nonce, 0);
        assert!(block.hash.meets_difficulty(1));
        assert_eq!(block.hash, block.compute_hash());
    }

    #[test]
    fn test_genesis_seal_survives_nonce_exhaustion() {
        let pow = ProofOfWork::new(1).with_max_nonce(0);
        let genesis = pow.seal_genesis(&[("alice".into(), "OMNI".into(), 5)], 1, 1);

        assert!(genesis.hash.meets_difficulty(1));
        assert!(genesis.timestamp >= 1);
        assert_eq!(genesis.hash, genesis.compute_hash());
    }

    #[test]
    fn test_timestamp_never_goes_backwards() {
        let pow = ProofOfWork::default();
        let future = u64::MAX / 4;
        let genesis = pow.seal_genesis(&[], future, 0);
        let block = pow.mine(vec![payment("a")], &genesis, 0);
        assert!(block.timestamp >= future);
    }
}
