// Proof of Work implementation

use crate::core::{Block, Hash256, Transaction, sha256};
use crate::error::{ChainError, Result};
use std::time::Instant;

/// Number of leading zero bits required of a block hash
pub const DIFFICULTY: u32 = 16;

/// Upper bound of the nonce search
pub const MAX_NONCE: u64 = i64::MAX as u64;

/// Proof of Work miner and validator
///
/// A hash satisfies the work requirement when, read as a big-endian 256-bit integer, it is
/// strictly below `2^(256 - difficulty)`.
#[derive(Debug, Clone, Copy)]
pub struct ProofOfWork {
    difficulty: u32,
    /// Big-endian target
    target: [u8; 32],
}

impl Default for ProofOfWork {
    fn default() -> Self {
        Self::new()
    }
}

impl ProofOfWork {
    /// Proof of work at the process-wide difficulty
    pub fn new() -> Self {
        Self::with_difficulty(DIFFICULTY)
    }

    /// Proof of work at an explicit difficulty, clamped to 1..=255 bits
    pub fn with_difficulty(difficulty: u32) -> Self {
        let difficulty = difficulty.clamp(1, 255);
        let shift = (256 - difficulty) as usize;

        let mut target = [0u8; 32];
        target[31 - shift / 8] = 1u8 << (shift % 8);

        Self { difficulty, target }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn target(&self) -> Hash256 {
        Hash256::new(self.target)
    }

    /// Check if a hash meets the target (hash < target)
    #[inline]
    pub fn meets_target(&self, hash: &Hash256) -> bool {
        hash.as_bytes() < &self.target
    }

    /// Bytes hashed for a candidate nonce
    fn prepare_data(&self, block: &Block, tx_digest: &Hash256, nonce: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(88);
        data.extend_from_slice(&block.timestamp.to_be_bytes());
        data.extend_from_slice(tx_digest.as_bytes());
        data.extend_from_slice(block.prev_hash.as_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&(self.difficulty as u64).to_be_bytes());
        data
    }

    /// Search nonces from 0 until the block hash meets the target
    pub fn run(&self, block: &Block) -> Result<MiningResult> {
        let start_time = Instant::now();
        let tx_digest = block.hash_transactions();

        for nonce in 0..=MAX_NONCE {
            let hash = sha256(&self.prepare_data(block, &tx_digest, nonce));

            if self.meets_target(&hash) {
                return Ok(MiningResult {
                    nonce,
                    hash,
                    attempts: nonce + 1,
                    duration: start_time.elapsed(),
                });
            }

            if nonce > 0 && nonce % 100_000 == 0 {
                let elapsed = start_time.elapsed();
                log::debug!("Mining attempts: {} ({:.1} KH/s)",
                    nonce,
                    nonce as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }
        }

        Err(ChainError::NonceExhausted)
    }

    /// Recompute the hash at the stored nonce; it must match `block.hash` and meet the target
    pub fn validate(&self, block: &Block) -> bool {
        let hash = sha256(&self.prepare_data(block, &block.hash_transactions(), block.nonce));
        hash == block.hash && self.meets_target(&hash)
    }

    /// Assemble and mine a new block
    pub fn mine(&self, transactions: Vec<Transaction>, prev_hash: Hash256, height: u64) -> Result<Block> {
        let mut block = Block::unmined(transactions, prev_hash, height);
        let result = self.run(&block)?;

        block.nonce = result.nonce;
        block.hash = result.hash;

        log::debug!("Mined block {} at height {} after {} attempts ({:.0} H/s)",
            block.hash, height, result.attempts, result.hash_rate());

        Ok(block)
    }
}

/// Mining result
#[derive(Debug)]
pub struct MiningResult {
    /// The nonce that was found
    pub nonce: u64,
    /// The resulting hash
    pub hash: Hash256,
    /// Number of attempts
    pub attempts: u64,
    /// Time taken
    pub duration: std::time::Duration,
}

impl MiningResult {
    /// Calculate hash rate (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64().max(f64::EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_bits() {
        let pow = ProofOfWork::with_difficulty(8);
        let mut expected = [0u8; 32];
        expected[0] = 0x01;
        assert_eq!(pow.target(), Hash256::new(expected));

        let pow = ProofOfWork::with_difficulty(16);
        let mut expected = [0u8; 32];
        expected[1] = 0x01;
        assert_eq!(pow.target(), Hash256::new(expected));

        let pow = ProofOfWork::with_difficulty(3);
        let mut expected = [0u8; 32];
        expected[0] = 0x20;
        assert_eq!(pow.target(), Hash256::new(expected));
    }

    #[test]
    fn test_target_comparison() {
        let pow = ProofOfWork::with_difficulty(16);

        assert!(pow.meets_target(&Hash256::zero()));
        assert!(!pow.meets_target(&Hash256::new([0xff; 32])));
        // Equal to the target is not enough
        assert!(!pow.meets_target(&pow.target()));

        let mut just_below = [0xffu8; 32];
        just_below[0] = 0;
        just_below[1] = 0;
        assert!(pow.meets_target(&Hash256::new(just_below)));
    }

    #[test]
    fn test_mined_blocks_validate_at_every_difficulty() {
        for difficulty in 1..=12 {
            let pow = ProofOfWork::with_difficulty(difficulty);
            let coinbase = Transaction::coinbase(&[difficulty as u8; 20], "pow");
            let block = pow.mine(vec![coinbase], Hash256::new([1; 32]), 1).unwrap();

            assert!(pow.validate(&block), "difficulty {}", difficulty);
            assert!(pow.meets_target(&block.hash));
        }
    }

    #[test]
    fn test_mine_at_default_difficulty() {
        let pow = ProofOfWork::new();
        let coinbase = Transaction::coinbase(&[1u8; 20], "default");
        let block = pow.mine(vec![coinbase], Hash256::zero(), 0).unwrap();

        assert!(pow.validate(&block));
        assert_eq!(&block.hash.as_bytes()[..2], &[0, 0]);
    }

    #[test]
    fn test_tampered_block_fails_validation() {
        let pow = ProofOfWork::with_difficulty(8);
        let coinbase = Transaction::coinbase(&[1u8; 20], "tamper");
        let block = pow.mine(vec![coinbase], Hash256::zero(), 0).unwrap();

        let mut wrong_nonce = block.clone();
        wrong_nonce.nonce += 1;
        assert!(!pow.validate(&wrong_nonce));

        let mut wrong_tx = block.clone();
        wrong_tx.transactions[0].outputs[0].value += 1;
        assert!(!pow.validate(&wrong_tx));

        let mut wrong_parent = block;
        wrong_parent.prev_hash = Hash256::new([3; 32]);
        assert!(!pow.validate(&wrong_parent));
    }
}
