use crate::transaction::{Transaction, TxStatus};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// SHA-256 digest, shown as lowercase hex
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Hash(bytes))
    }

    /// Leading zero nibbles of the hex representation
    pub fn leading_zero_nibbles(&self) -> u32 {
        let mut count = 0;
        for byte in self.0 {
            if byte == 0 {
                count += 2;
                continue;
            }
            if byte >> 4 == 0 {
                count += 1;
            }
            break;
        }
        count
    }

    pub fn meets_difficulty(&self, difficulty: u8) -> bool {
        self.leading_zero_nibbles() >= difficulty as u32
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Hash::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Hash)
        }
    }
}

/// A hash-linked batch of transactions.
///
/// SAFETY INVARIANTS:
/// 1. `hash` is the digest of (index, timestamp, transactions, previous_hash, nonce)
/// 2. `hash` carries at least `difficulty` leading zero nibbles
/// 3. Once appended to the chain, a block is never mutated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block height in the chain (0 = genesis)
    pub index: u64,

    /// Block creation timestamp (ms since Unix epoch)
    pub timestamp: u64,

    /// Transactions in admission order
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block (all zeros for genesis)
    pub previous_hash: Hash,

    /// Proof-of-work nonce
    pub nonce: u64,

    /// Hash of this block
    pub hash: Hash,
}

impl Block {
    /// Build an unsealed candidate with `nonce = 0`
    pub fn candidate(
        index: u64,
        timestamp: u64,
        transactions: Vec<Transaction>,
        previous_hash: Hash,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp,
            transactions,
            previous_hash,
            nonce: 0,
            hash: Hash::ZERO,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Hasher primed with everything but the nonce.
    ///
    /// The proof-of-work search clones this state once per nonce.
    pub fn prefix_hasher(&self) -> Sha256 {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update((self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            tx.feed_canonical(&mut hasher);
        }
        hasher.update(self.previous_hash.0);
        hasher
    }

    /// Finish a primed hasher with `nonce`
    pub fn hash_with_nonce(prefix: &Sha256, nonce: u64) -> Hash {
        let mut hasher = prefix.clone();
        hasher.update(nonce.to_le_bytes());
        Hash(hasher.finalize().into())
    }

    /// Recompute the block hash from its contents
    pub fn compute_hash(&self) -> Hash {
        Self::hash_with_nonce(&self.prefix_hasher(), self.nonce)
    }

    /// Fix the nonce and store the matching hash
    pub fn seal(&mut self, nonce: u64, hash: Hash) {
        self.nonce = nonce;
        self.hash = hash;
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn summary(&self) -> BlockSummary {
        let confirmed = self
            .transactions
            .iter()
            .filter(|tx| tx.status == TxStatus::Confirmed)
            .count();
        let failed = self
            .transactions
            .iter()
            .filter(|tx| tx.status == TxStatus::Failed)
            .count();

        BlockSummary {
            index: self.index,
            hash: self.hash,
            previous_hash: self.previous_hash,
            timestamp: self.timestamp,
            nonce: self.nonce,
            tx_count: self.transactions.len(),
            confirmed,
            failed,
        }
    }
}

/// Compact description of an appended block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub index: u64,
    pub hash: Hash,
    pub previous_hash: Hash,
    pub timestamp: u64,
    pub nonce: u64,
    pub tx_count: usize,
    pub confirmed: usize,
    pub failed: usize,
}
