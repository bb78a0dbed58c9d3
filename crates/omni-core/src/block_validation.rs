use crate::block::{Block, Hash};
use crate::blockchain::ChainError;

pub struct BlockValidator;

impl BlockValidator {
    /// **Recompute the hash and check the difficulty target**
    ///
    /// SAFETY: The stored hash is never trusted; it is recomputed from content.
    pub fn validate_pow(block: &Block, difficulty: u8) -> Result<(), ChainError> {
        let recomputed = block.compute_hash();
        if recomputed != block.hash {
            log::error!(
                "Block {} hash mismatch: stored {}, recomputed {}",
                block.index,
                block.hash,
                recomputed
            );
            return Err(ChainError::HashMismatch {
                index: block.index,
                stored: block.hash,
                computed: recomputed,
            });
        }

        if !block.hash.meets_difficulty(difficulty) {
            log::error!(
                "Block {} misses difficulty {} (has {} leading zeros)",
                block.index,
                difficulty,
                block.hash.leading_zero_nibbles()
            );
            return Err(ChainError::BadDifficulty {
                index: block.index,
                required: difficulty,
                found: block.hash.leading_zero_nibbles(),
            });
        }

        Ok(())
    }

    /// **Ensure new block links correctly to the previous block**
    pub fn validate_block_link(prev_block: &Block, current_block: &Block) -> Result<(), ChainError> {
        if current_block.index != prev_block.index + 1 {
            log::error!(
                "Block index {} does not follow {}",
                current_block.index,
                prev_block.index
            );
            return Err(ChainError::BadIndex {
                expected: prev_block.index + 1,
                found: current_block.index,
            });
        }

        if current_block.previous_hash != prev_block.hash {
            log::error!(
                "Block {} link mismatch! Expected {}, got {}",
                current_block.index,
                prev_block.hash,
                current_block.previous_hash
            );
            return Err(ChainError::BrokenLink {
                index: current_block.index,
                expected: prev_block.hash,
                found: current_block.previous_hash,
            });
        }

        Ok(())
    }

    /// **Genesis shape: index 0, zero parent, valid proof-of-work**
    pub fn validate_genesis(block: &Block, difficulty: u8) -> Result<(), ChainError> {
        if block.index != 0 {
            return Err(ChainError::BadIndex {
                expected: 0,
                found: block.index,
            });
        }
        if block.previous_hash != Hash::ZERO {
            return Err(ChainError::BrokenLink {
                index: 0,
                expected: Hash::ZERO,
                found: block.previous_hash,
            });
        }
        Self::validate_pow(block, difficulty)
    }

    /// **Full block validation pipeline**
    ///
    /// SAFETY: Executes all validation steps in strict order:
    /// 1. Link validation
    /// 2. Hash recomputation and difficulty
    pub fn validate_full_block(prev_block: &Block, block: &Block, difficulty: u8) -> Result<(), ChainError> {
        Self::validate_block_link(prev_block, block)?;
        Self::validate_pow(block, difficulty)?;
        log::debug!("Block {} passed full validation pipeline", block.index);
        Ok(())
    }
}
