#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! The chain specification: hardfork schedule, genesis definition and
//! fork-ID computation for the btp chain.

use once_cell::sync::Lazy;
use rbtp_primitives::{
    keccak256, BlockNumber, ChainId, Head, Header, TrieAccount, B256, B64, KECCAK_EMPTY, U256,
};
use rbtp_trie::root::{state_root_unhashed, storage_root_unhashed};
use std::{collections::BTreeMap, sync::Arc};

mod forkid;
mod genesis;

pub use forkid::{ForkFilter, ForkHash, ForkId, ValidationError};
pub use genesis::{ChainConfig, Genesis, GenesisAccount};

/// The named protocol upgrades of the btp chain, in activation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Hardfork {
    /// The launch rule set.
    Frontier,
    /// Homestead difficulty rules.
    Homestead,
    /// Tangerine Whistle gas repricing (EIP-150).
    Tangerine,
    /// Spurious Dragon: replay protection (EIP-155) and empty-account
    /// pruning (EIP-158).
    SpuriousDragon,
    /// Byzantium: status receipts, reduced reward, bomb delay.
    Byzantium,
    /// Constantinople: further reward reduction and bomb delay.
    Constantinople,
    /// Petersburg: Constantinople with EIP-1283 rolled back.
    Petersburg,
}

impl Hardfork {
    /// All known forks, oldest first.
    pub const ALL: [Self; 7] = [
        Self::Frontier,
        Self::Homestead,
        Self::Tangerine,
        Self::SpuriousDragon,
        Self::Byzantium,
        Self::Constantinople,
        Self::Petersburg,
    ];
}

/// When a [`Hardfork`] activates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForkCondition {
    /// Active from the given block number on.
    Block(BlockNumber),
    /// Never activates.
    #[default]
    Never,
}

impl ForkCondition {
    /// Whether the fork is active at `number`.
    pub const fn active_at_block(&self, number: BlockNumber) -> bool {
        match self {
            Self::Block(block) => *block <= number,
            Self::Never => false,
        }
    }

    /// The activation block, if scheduled.
    pub const fn as_block(&self) -> Option<BlockNumber> {
        match self {
            Self::Block(block) => Some(*block),
            Self::Never => None,
        }
    }
}

/// The full specification of a chain: its id, genesis and fork schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    /// The chain id committed to by EIP-155 signatures.
    pub chain_id: ChainId,
    /// The genesis definition.
    pub genesis: Genesis,
    /// Hash of the genesis header, advertised in handshakes.
    genesis_hash: B256,
    /// The genesis header built from [`Self::genesis`].
    genesis_header: Header,
    /// The fork schedule.
    pub hardforks: BTreeMap<Hardfork, ForkCondition>,
}

impl ChainSpec {
    /// Builds the spec from a parsed genesis definition.
    pub fn from_genesis(genesis: Genesis) -> Self {
        let hardforks = BTreeMap::from([
            (Hardfork::Frontier, ForkCondition::Block(0)),
            (Hardfork::Homestead, block_or_never(genesis.config.homestead_block)),
            (Hardfork::Tangerine, block_or_never(genesis.config.eip150_block)),
            // EIP-155 and EIP-158 activate together
            (
                Hardfork::SpuriousDragon,
                block_or_never(genesis.config.eip158_block.or(genesis.config.eip155_block)),
            ),
            (Hardfork::Byzantium, block_or_never(genesis.config.byzantium_block)),
            (Hardfork::Constantinople, block_or_never(genesis.config.constantinople_block)),
            (Hardfork::Petersburg, block_or_never(genesis.config.petersburg_block)),
        ]);

        let genesis_header = build_genesis_header(&genesis);
        let genesis_hash = genesis_header.hash_slow();

        Self { chain_id: genesis.config.chain_id, genesis, genesis_hash, genesis_header, hardforks }
    }

    /// A builder for hand-assembled specs, used mostly in tests.
    pub fn builder() -> ChainSpecBuilder {
        ChainSpecBuilder::default()
    }

    /// The hash of the genesis header.
    pub const fn genesis_hash(&self) -> B256 {
        self.genesis_hash
    }

    /// The genesis header.
    pub const fn genesis_header(&self) -> &Header {
        &self.genesis_header
    }

    /// The activation condition for `fork`.
    pub fn fork(&self, fork: Hardfork) -> ForkCondition {
        self.hardforks.get(&fork).copied().unwrap_or(ForkCondition::Never)
    }

    /// Whether `fork` is active at block `number`.
    pub fn fork_active(&self, fork: Hardfork, number: BlockNumber) -> bool {
        self.fork(fork).active_at_block(number)
    }

    /// The block `fork` activates at, if scheduled.
    pub fn fork_block(&self, fork: Hardfork) -> Option<BlockNumber> {
        self.fork(fork).as_block()
    }

    /// Sorted, deduplicated non-genesis fork blocks, as folded into the
    /// fork hash.
    pub fn fork_blocks(&self) -> Vec<BlockNumber> {
        let mut blocks: Vec<BlockNumber> = self
            .hardforks
            .values()
            .filter_map(|cond| cond.as_block())
            .filter(|block| *block > 0)
            .collect();
        blocks.sort_unstable();
        blocks.dedup();
        blocks
    }

    /// The fork id to advertise at `head`.
    pub fn fork_id(&self, head: &Head) -> ForkId {
        self.fork_filter(*head).current()
    }

    /// A validation filter for remote fork ids at `head`.
    pub fn fork_filter(&self, head: Head) -> ForkFilter {
        ForkFilter::new(self.genesis_hash, self.fork_blocks(), head.number)
    }
}

fn block_or_never(block: Option<BlockNumber>) -> ForkCondition {
    block.map_or(ForkCondition::Never, ForkCondition::Block)
}

/// Builds the block-0 header, computing the state root from the allocation.
fn build_genesis_header(genesis: &Genesis) -> Header {
    let accounts = genesis.alloc.iter().map(|(address, account)| {
        let storage_root = account
            .storage
            .as_ref()
            .map(|storage| {
                storage_root_unhashed(
                    storage.iter().map(|(key, value)| (*key, U256::from_be_bytes(value.0))),
                )
            })
            .unwrap_or(rbtp_primitives::EMPTY_ROOT_HASH);
        let code_hash = account.code.as_ref().map_or(KECCAK_EMPTY, keccak256);
        (
            *address,
            TrieAccount {
                nonce: account.nonce.unwrap_or_default(),
                balance: account.balance,
                storage_root,
                code_hash,
            },
        )
    });

    Header {
        parent_hash: genesis.parent_hash,
        beneficiary: genesis.coinbase,
        state_root: state_root_unhashed(accounts),
        difficulty: genesis.difficulty,
        number: 0,
        gas_limit: genesis.gas_limit,
        gas_used: 0,
        timestamp: genesis.timestamp,
        extra_data: genesis.extra_data.clone(),
        mix_hash: genesis.mix_hash,
        nonce: B64::from(genesis.nonce),
        ..Default::default()
    }
}

/// Incremental [`ChainSpec`] assembly.
#[derive(Debug, Default)]
pub struct ChainSpecBuilder {
    chain_id: Option<ChainId>,
    genesis: Option<Genesis>,
    hardforks: BTreeMap<Hardfork, ForkCondition>,
}

impl ChainSpecBuilder {
    /// Sets the chain id.
    pub fn chain_id(mut self, chain_id: ChainId) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    /// Sets the genesis definition.
    pub fn genesis(mut self, genesis: Genesis) -> Self {
        self.genesis = Some(genesis);
        self
    }

    /// Schedules `fork` at `condition`.
    pub fn with_fork(mut self, fork: Hardfork, condition: ForkCondition) -> Self {
        self.hardforks.insert(fork, condition);
        self
    }

    /// Schedules every known fork at genesis.
    pub fn all_forks_at_genesis(mut self) -> Self {
        for fork in Hardfork::ALL {
            self.hardforks.insert(fork, ForkCondition::Block(0));
        }
        self
    }

    /// Assembles the spec.
    pub fn build(self) -> ChainSpec {
        let genesis = self.genesis.unwrap_or_default();
        let mut spec = ChainSpec::from_genesis(genesis);
        if let Some(chain_id) = self.chain_id {
            spec.chain_id = chain_id;
        }
        for (fork, condition) in self.hardforks {
            spec.hardforks.insert(fork, condition);
        }
        spec
    }
}

/// A development chain: every fork live at genesis, low difficulty, two
/// funded accounts.
pub static DEV: Lazy<Arc<ChainSpec>> = Lazy::new(|| {
    let genesis: Genesis = serde_json::from_str(include_str!("../res/dev_genesis.json"))
        .expect("dev genesis is valid json");
    Arc::new(ChainSpec::from_genesis(genesis))
});

#[cfg(test)]
mod tests {
    use super::*;
    use rbtp_primitives::Address;

    #[test]
    fn dev_spec_boots() {
        let spec = &*DEV;
        assert_eq!(spec.chain_id, 1337);
        assert!(spec.fork_active(Hardfork::SpuriousDragon, 0));
        assert!(spec.fork_active(Hardfork::Petersburg, 0));
        assert_eq!(spec.fork_blocks(), Vec::<BlockNumber>::new());
        // the genesis hash must be stable across runs
        assert_eq!(spec.genesis_hash(), DEV.genesis_hash());
    }

    #[test]
    fn genesis_alloc_reaches_state_root() {
        let spec = &*DEV;
        let alloc_root = spec.genesis_header().state_root;
        assert_ne!(alloc_root, rbtp_primitives::EMPTY_ROOT_HASH);

        // a different allocation produces a different root
        let mut genesis = spec.genesis.clone();
        genesis.alloc.insert(Address::repeat_byte(0x99), GenesisAccount {
            balance: U256::from(5),
            ..Default::default()
        });
        let other = ChainSpec::from_genesis(genesis);
        assert_ne!(other.genesis_header().state_root, alloc_root);
        assert_ne!(other.genesis_hash(), spec.genesis_hash());
    }

    #[test]
    fn staged_forks_advertise_next() {
        let spec = ChainSpec::builder()
            .genesis(Genesis::default())
            .with_fork(Hardfork::Homestead, ForkCondition::Block(5))
            .with_fork(Hardfork::Byzantium, ForkCondition::Block(10))
            .build();
        assert_eq!(spec.fork_blocks(), vec![5, 10]);

        let head = |number| Head { number, ..Default::default() };
        assert_eq!(spec.fork_id(&head(0)).next, 5);
        assert_eq!(spec.fork_id(&head(5)).next, 10);
        assert_eq!(spec.fork_id(&head(10)).next, 0);
        assert_ne!(spec.fork_id(&head(0)).hash, spec.fork_id(&head(5)).hash);
    }

    #[test]
    fn fork_condition_boundaries() {
        let cond = ForkCondition::Block(7);
        assert!(!cond.active_at_block(6));
        assert!(cond.active_at_block(7));
        assert!(cond.active_at_block(8));
        assert!(!ForkCondition::Never.active_at_block(u64::MAX));
    }
}
