//! The btpash sealing function.
//!
//! Verification needs only a small per-epoch cache derived from a rotating
//! seed: the seed advances by one keccak256 per epoch, the cache is a
//! keccak256 chain seeded from it, and the mix digest folds cache lookups
//! into the header's seal hash. The final digest must fall below
//! `2^256 / difficulty`.

use rbtp_primitives::{keccak256, B256, U256};

/// Number of blocks sharing one dataset seed.
pub const EPOCH_LENGTH: u64 = 30_000;

/// Number of 32-byte items in the per-epoch cache.
const CACHE_ITEMS: usize = 1024;

/// Number of cache folds per seal attempt.
const MIX_ROUNDS: usize = 32;

/// The seed of the given epoch: `epoch` keccak256 iterations over zero.
pub fn seed_hash(epoch: u64) -> B256 {
    let mut seed = B256::ZERO;
    for _ in 0..epoch {
        seed = keccak256(seed);
    }
    seed
}

/// The epoch a block number falls into.
pub const fn epoch(number: u64) -> u64 {
    number / EPOCH_LENGTH
}

/// The verification cache of one epoch.
#[derive(Debug, Clone)]
pub struct Cache {
    epoch: u64,
    items: Vec<B256>,
}

impl Cache {
    /// Generates the cache for `epoch`.
    pub fn new(epoch: u64) -> Self {
        let mut items = Vec::with_capacity(CACHE_ITEMS);
        let mut item = keccak256(seed_hash(epoch));
        for _ in 0..CACHE_ITEMS {
            items.push(item);
            item = keccak256(item);
        }
        Self { epoch, items }
    }

    /// The epoch this cache belongs to.
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Runs the sealing function over `seal_hash` and `nonce`, returning the
    /// mix digest and the final result digest.
    pub fn hashimoto(&self, seal_hash: B256, nonce: u64) -> (B256, B256) {
        let mut mix = {
            let mut buf = [0u8; 40];
            buf[..32].copy_from_slice(seal_hash.as_slice());
            buf[32..].copy_from_slice(&nonce.to_le_bytes());
            keccak256(buf)
        };

        for _ in 0..MIX_ROUNDS {
            let index =
                u32::from_le_bytes(mix[..4].try_into().expect("4 bytes")) as usize % CACHE_ITEMS;
            let mut folded = [0u8; 32];
            for (out, (a, b)) in
                folded.iter_mut().zip(mix.iter().zip(self.items[index].iter()))
            {
                *out = a ^ b;
            }
            mix = keccak256(folded);
        }

        let mut buf = [0u8; 72];
        buf[..32].copy_from_slice(seal_hash.as_slice());
        buf[32..40].copy_from_slice(&nonce.to_le_bytes());
        buf[40..].copy_from_slice(mix.as_slice());
        (mix, keccak256(buf))
    }
}

/// The boundary a result digest must not exceed: `2^256 / difficulty`.
pub fn target(difficulty: U256) -> U256 {
    if difficulty.is_zero() {
        return U256::MAX
    }
    U256::MAX / difficulty
}

/// Whether `result` satisfies `difficulty`.
pub fn meets_target(result: B256, difficulty: U256) -> bool {
    U256::from_be_bytes(result.0) <= target(difficulty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_rotates_per_epoch() {
        assert_eq!(seed_hash(0), B256::ZERO);
        assert_ne!(seed_hash(1), seed_hash(2));
        assert_eq!(epoch(0), 0);
        assert_eq!(epoch(EPOCH_LENGTH - 1), 0);
        assert_eq!(epoch(EPOCH_LENGTH), 1);
    }

    #[test]
    fn hashimoto_is_deterministic_per_epoch() {
        let cache = Cache::new(0);
        let seal_hash = B256::repeat_byte(0x11);
        let (mix_a, result_a) = cache.hashimoto(seal_hash, 42);
        let (mix_b, result_b) = cache.hashimoto(seal_hash, 42);
        assert_eq!((mix_a, result_a), (mix_b, result_b));

        // a different nonce moves both digests
        let (mix_c, result_c) = cache.hashimoto(seal_hash, 43);
        assert_ne!(mix_a, mix_c);
        assert_ne!(result_a, result_c);

        // a different epoch moves the result for the same input
        let other = Cache::new(1);
        assert_ne!(other.hashimoto(seal_hash, 42).1, result_a);
    }

    #[test]
    fn target_scales_inversely_with_difficulty() {
        assert!(target(U256::from(2)) < target(U256::from(1)));
        // difficulty one accepts everything
        assert!(meets_target(B256::repeat_byte(0xff), U256::from(1)));
    }
}
