#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! The btpash proof-of-work consensus engine.
//!
//! Covers the full engine contract: standalone and parent-relative header
//! validity, seal verification against the epoch cache, difficulty
//! retargeting with per-fork bomb delays, reward finalization, plus local
//! mining workers and the remote-miner work queue.

use parking_lot::Mutex;
use rbtp_chainspec::ChainSpec;
use rbtp_interfaces::consensus::{Consensus, ConsensusError};
use rbtp_primitives::{
    constants::{
        ALLOWED_FUTURE_BLOCK_TIME, GAS_LIMIT_BOUND_DIVISOR, MAXIMUM_EXTRA_DATA_SIZE,
        MAX_OMMERS_PER_BLOCK, MAX_OMMER_DEPTH, MIN_GAS_LIMIT,
    },
    Header, SealedBlock, SealedHeader, U256,
};
use rbtp_trie::StateDb;
use std::{
    collections::HashSet,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

pub mod algorithm;
mod difficulty;
mod remote;
mod reward;
mod sealer;

pub use algorithm::{epoch, seed_hash, Cache, EPOCH_LENGTH};
pub use difficulty::{calc_difficulty, MINIMUM_DIFFICULTY};
pub use remote::{RemoteSealer, WorkPackage};
pub use reward::{block_reward, nephew_reward, ommer_reward};
pub use sealer::{SealJob, Sealer};

/// How many epoch caches are kept in memory.
const CACHES_IN_MEMORY: usize = 3;

/// The btpash engine.
#[derive(Debug)]
pub struct Btpash {
    spec: Arc<ChainSpec>,
    /// MRU list of generated epoch caches.
    caches: Mutex<Vec<Arc<Cache>>>,
}

impl Btpash {
    /// Creates the engine for the given chain spec.
    pub fn new(spec: Arc<ChainSpec>) -> Self {
        Self { spec, caches: Mutex::new(Vec::new()) }
    }

    /// The chain spec the engine validates against.
    pub fn spec(&self) -> &Arc<ChainSpec> {
        &self.spec
    }

    /// The verification cache for `epoch`, generating it on first use.
    pub fn cache(&self, epoch: u64) -> Arc<Cache> {
        let mut caches = self.caches.lock();
        if let Some(pos) = caches.iter().position(|cache| cache.epoch() == epoch) {
            let cache = caches.remove(pos);
            caches.push(Arc::clone(&cache));
            return cache
        }
        let cache = Arc::new(Cache::new(epoch));
        caches.push(Arc::clone(&cache));
        if caches.len() > CACHES_IN_MEMORY {
            caches.remove(0);
        }
        cache
    }

    /// Fills the consensus fields of a header under construction:
    /// difficulty from the retarget rule, seal fields zeroed for mining.
    pub fn prepare(&self, parent: &SealedHeader, header: &mut Header) {
        header.difficulty = self.calc_difficulty(parent, header.timestamp);
        header.mix_hash = Default::default();
        header.nonce = Default::default();
    }
}

impl Consensus for Btpash {
    fn validate_header(&self, header: &SealedHeader) -> Result<(), ConsensusError> {
        if header.gas_used > header.gas_limit {
            return Err(ConsensusError::HeaderGasUsedExceedsGasLimit {
                gas_used: header.gas_used,
                gas_limit: header.gas_limit,
            })
        }

        if header.gas_limit < MIN_GAS_LIMIT {
            return Err(ConsensusError::GasLimitBelowMinimum { gas_limit: header.gas_limit })
        }

        if header.number > 0 && header.extra_data.len() > MAXIMUM_EXTRA_DATA_SIZE {
            return Err(ConsensusError::ExtraDataExceedsMax { len: header.extra_data.len() })
        }

        // clock drift is capped; a peer ahead of that is either broken or
        // hostile
        let present_timestamp =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        if header.timestamp > present_timestamp + ALLOWED_FUTURE_BLOCK_TIME {
            return Err(ConsensusError::TimestampIsInFuture {
                timestamp: header.timestamp,
                present_timestamp,
            })
        }

        Ok(())
    }

    fn validate_header_against_parent(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError> {
        if parent.number + 1 != header.number {
            return Err(ConsensusError::ParentBlockNumberMismatch {
                parent_block_number: parent.number,
                block_number: header.number,
            })
        }

        if parent.hash() != header.parent_hash {
            return Err(ConsensusError::ParentHashMismatch(
                (header.parent_hash, parent.hash()).into(),
            ))
        }

        if header.timestamp <= parent.timestamp {
            return Err(ConsensusError::TimestampIsInPast {
                parent_timestamp: parent.timestamp,
                timestamp: header.timestamp,
            })
        }

        validate_gas_limit_difference(header, parent)?;

        let expected = self.calc_difficulty(parent, header.timestamp);
        if header.difficulty != expected {
            return Err(ConsensusError::DifficultyDiff((header.difficulty, expected).into()))
        }

        Ok(())
    }

    fn validate_seal(&self, header: &SealedHeader) -> Result<(), ConsensusError> {
        if header.number == 0 {
            // the genesis seal is an arbitrary constant
            return Ok(())
        }
        let cache = self.cache(epoch(header.number));
        let nonce = u64::from_be_bytes(header.nonce.0);
        let (mix, result) = cache.hashimoto(header.seal_hash(), nonce);
        if mix != header.mix_hash || !algorithm::meets_target(result, header.difficulty) {
            return Err(ConsensusError::InvalidSeal)
        }
        Ok(())
    }

    fn validate_block(&self, block: &SealedBlock) -> Result<(), ConsensusError> {
        let transactions_root = rbtp_trie::root::calculate_transaction_root(&block.body);
        if block.transactions_root != transactions_root {
            return Err(ConsensusError::BodyTransactionRootDiff(
                (transactions_root, block.transactions_root).into(),
            ))
        }

        let ommers_hash = rbtp_trie::root::calculate_ommers_hash(&block.ommers);
        if block.ommers_hash != ommers_hash {
            return Err(ConsensusError::BodyOmmersHashDiff(
                (ommers_hash, block.ommers_hash).into(),
            ))
        }

        if block.ommers.len() > MAX_OMMERS_PER_BLOCK {
            return Err(ConsensusError::TooManyOmmers { count: block.ommers.len() })
        }

        // structural ommer checks; ancestry and canonical-duplicate checks
        // need chain access and happen at import
        let mut seen = HashSet::new();
        for ommer in &block.ommers {
            let hash = ommer.hash_slow();
            if !seen.insert(hash) {
                return Err(ConsensusError::DuplicateOmmer { hash })
            }
            if ommer.number >= block.number ||
                ommer.number + MAX_OMMER_DEPTH < block.number
            {
                return Err(ConsensusError::OmmerTooOld { hash })
            }
            if self.validate_header(&ommer.clone().seal(hash)).is_err() {
                return Err(ConsensusError::InvalidOmmerHeader { hash })
            }
        }

        Ok(())
    }

    fn calc_difficulty(&self, parent: &SealedHeader, timestamp: u64) -> U256 {
        difficulty::calc_difficulty(&self.spec, parent, timestamp)
    }

    fn finalize(
        &self,
        header: &Header,
        ommers: &[Header],
        state: &mut StateDb,
    ) -> Result<(), ConsensusError> {
        let base = block_reward(&self.spec, header.number);

        let mut miner_reward = base;
        for ommer in ommers {
            state.add_balance(ommer.beneficiary, ommer_reward(base, header.number, ommer))?;
            miner_reward += nephew_reward(base);
        }
        state.add_balance(header.beneficiary, miner_reward)?;
        Ok(())
    }
}

/// Verifies the gas limit drift between parent and child stays inside
/// `parent_gas_limit / 1024`.
fn validate_gas_limit_difference(
    child: &SealedHeader,
    parent: &SealedHeader,
) -> Result<(), ConsensusError> {
    let parent_gas_limit = parent.gas_limit;

    if child.gas_limit > parent_gas_limit {
        if child.gas_limit - parent_gas_limit >= parent_gas_limit / GAS_LIMIT_BOUND_DIVISOR {
            return Err(ConsensusError::GasLimitInvalidIncrease {
                parent_gas_limit,
                child_gas_limit: child.gas_limit,
            })
        }
    } else if parent_gas_limit - child.gas_limit >= parent_gas_limit / GAS_LIMIT_BOUND_DIVISOR {
        return Err(ConsensusError::GasLimitInvalidDecrease {
            parent_gas_limit,
            child_gas_limit: child.gas_limit,
        })
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbtp_chainspec::DEV;
    use rbtp_primitives::{constants::WEI_PER_BTP, Address, B64, EMPTY_ROOT_HASH};
    use rbtp_trie::MemoryTrieDb;

    fn engine() -> Btpash {
        Btpash::new(Arc::clone(&*DEV))
    }

    fn sealed_child(parent: &SealedHeader, engine: &Btpash) -> SealedHeader {
        let mut header = Header {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            gas_limit: parent.gas_limit,
            timestamp: parent.timestamp + 13,
            ..Default::default()
        };
        engine.prepare(parent, &mut header);
        header.seal_slow()
    }

    #[test]
    fn standalone_header_bounds() {
        let engine = engine();

        let over_gas = Header { gas_used: 10, gas_limit: 5, ..Default::default() }.seal_slow();
        assert!(matches!(
            engine.validate_header(&over_gas),
            Err(ConsensusError::HeaderGasUsedExceedsGasLimit { .. })
        ));

        let tiny_limit = Header { gas_limit: 100, ..Default::default() }.seal_slow();
        assert!(matches!(
            engine.validate_header(&tiny_limit),
            Err(ConsensusError::GasLimitBelowMinimum { .. })
        ));

        let fat_extra = Header {
            number: 1,
            gas_limit: MIN_GAS_LIMIT,
            extra_data: vec![0u8; 33].into(),
            ..Default::default()
        }
        .seal_slow();
        assert!(matches!(
            engine.validate_header(&fat_extra),
            Err(ConsensusError::ExtraDataExceedsMax { len: 33 })
        ));

        let future = Header {
            gas_limit: MIN_GAS_LIMIT,
            timestamp: u64::MAX - 1000,
            ..Default::default()
        }
        .seal_slow();
        assert!(matches!(
            engine.validate_header(&future),
            Err(ConsensusError::TimestampIsInFuture { .. })
        ));
    }

    #[test]
    fn parent_relative_checks() {
        let engine = engine();
        let parent = DEV.genesis_header().clone().seal_slow();
        let good = sealed_child(&parent, &engine);
        engine.validate_header_against_parent(&good, &parent).unwrap();

        let mut equal_time = good.header().clone();
        equal_time.timestamp = parent.timestamp;
        assert!(matches!(
            engine.validate_header_against_parent(&equal_time.seal_slow(), &parent),
            Err(ConsensusError::TimestampIsInPast { .. })
        ));

        let mut jumpy_gas = good.header().clone();
        jumpy_gas.gas_limit = parent.gas_limit * 2;
        assert!(matches!(
            engine.validate_header_against_parent(&jumpy_gas.seal_slow(), &parent),
            Err(ConsensusError::GasLimitInvalidIncrease { .. })
        ));

        let mut wrong_difficulty = good.header().clone();
        wrong_difficulty.difficulty = U256::from(1u64);
        assert!(matches!(
            engine.validate_header_against_parent(&wrong_difficulty.seal_slow(), &parent),
            Err(ConsensusError::DifficultyDiff(_))
        ));
    }

    #[test]
    fn bad_seal_is_rejected() {
        let engine = engine();
        let parent = DEV.genesis_header().clone().seal_slow();
        let mut header = sealed_child(&parent, &engine).unseal();
        header.nonce = B64::from(0xbad0bad0bad0bad0u64);
        // an unmined nonce practically never satisfies the target
        assert_eq!(
            engine.validate_seal(&header.seal_slow()),
            Err(ConsensusError::InvalidSeal)
        );
    }

    #[test]
    fn block_body_roots_are_enforced() {
        let engine = engine();
        let block = SealedBlock {
            header: Header {
                transactions_root: EMPTY_ROOT_HASH,
                ommers_hash: rbtp_primitives::EMPTY_OMMER_ROOT_HASH,
                ..Default::default()
            }
            .seal_slow(),
            body: vec![],
            ommers: vec![],
        };
        engine.validate_block(&block).unwrap();

        let bad = SealedBlock {
            header: Header {
                transactions_root: rbtp_primitives::B256::repeat_byte(7),
                ..Default::default()
            }
            .seal_slow(),
            body: vec![],
            ommers: vec![],
        };
        assert!(matches!(
            engine.validate_block(&bad),
            Err(ConsensusError::BodyTransactionRootDiff(_))
        ));
    }

    #[test]
    fn ommer_inclusion_rules() {
        let engine = engine();
        let ommer = Header { number: 1, gas_limit: MIN_GAS_LIMIT, ..Default::default() };
        let make = |ommers: Vec<Header>, number: u64| {
            let header = Header {
                number,
                ommers_hash: rbtp_trie::root::calculate_ommers_hash(&ommers),
                transactions_root: EMPTY_ROOT_HASH,
                ..Default::default()
            };
            SealedBlock { header: header.seal_slow(), body: vec![], ommers }
        };

        engine.validate_block(&make(vec![ommer.clone()], 2)).unwrap();

        assert!(matches!(
            engine.validate_block(&make(vec![ommer.clone(), ommer.clone()], 2)),
            Err(ConsensusError::DuplicateOmmer { .. })
        ));

        // nine generations back breaches the depth limit
        assert!(matches!(
            engine.validate_block(&make(vec![ommer.clone()], 10)),
            Err(ConsensusError::OmmerTooOld { .. })
        ));

        let mut triple = Vec::new();
        for i in 0..3 {
            triple.push(Header {
                number: 1,
                gas_limit: MIN_GAS_LIMIT + i,
                ..Default::default()
            });
        }
        assert!(matches!(
            engine.validate_block(&make(triple, 2)),
            Err(ConsensusError::TooManyOmmers { count: 3 })
        ));
    }

    #[test]
    fn finalize_credits_rewards() {
        let engine = engine();
        let miner = Address::repeat_byte(0xaa);
        let ommer_miner = Address::repeat_byte(0xbb);

        let header = Header { number: 10, beneficiary: miner, ..Default::default() };
        let ommer = Header { number: 9, beneficiary: ommer_miner, ..Default::default() };

        let mut state = StateDb::at(EMPTY_ROOT_HASH, Arc::new(MemoryTrieDb::new()));
        engine.finalize(&header, std::slice::from_ref(&ommer), &mut state).unwrap();

        // dev chain is past constantinople: base reward 2 btp
        let base = U256::from(WEI_PER_BTP) * U256::from(2);
        assert_eq!(state.balance(miner).unwrap(), base + base / U256::from(32));
        assert_eq!(
            state.balance(ommer_miner).unwrap(),
            U256::from(7) * base / U256::from(8)
        );
    }

    #[test]
    fn cache_is_reused_per_epoch() {
        let engine = engine();
        let a = engine.cache(0);
        let b = engine.cache(0);
        assert!(Arc::ptr_eq(&a, &b));
        for e in 1..5 {
            engine.cache(e);
        }
        // oldest caches were evicted, regeneration yields a fresh arc
        let c = engine.cache(0);
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
