//! Node configuration recognized by the core subsystems.
//!
//! CLI and file parsing live outside the core; these structs carry the
//! resolved values in, with defaults matching the reference client.

use rbtp_blockchain::TieBreak;
use rbtp_downloaders::SyncMode;
use rbtp_primitives::{Address, BlockNumHash, Bytes};
use rbtp_txpool::PoolConfig;
use std::path::PathBuf;

/// Top-level node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Where the database directory lives.
    pub datadir: PathBuf,
    /// How much of the chain to replay locally.
    pub sync_mode: SyncMode,
    /// Network id for peer selection.
    pub network_id: u64,
    /// Connection ceiling.
    pub max_peers: usize,
    /// Skip peer discovery entirely.
    pub no_discover: bool,
    /// NAT traversal hint handed to the transport layer.
    pub nat: Option<String>,
    /// A trusted checkpoint full sync may start from instead of genesis.
    pub checkpoint: Option<BlockNumHash>,
    /// Transaction pool limits.
    pub txpool: PoolConfig,
    /// Local mining settings.
    pub miner: MinerConfig,
    /// Trie cache and pruning behavior.
    pub trie: TrieConfig,
    /// Gas price oracle sampling.
    pub gpo: GpoConfig,
    /// Global gas cap for read-only call execution.
    pub rpc_gas_cap: u64,
    /// Equal-total-difficulty tie breaking.
    pub tie_break: TieBreak,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            datadir: PathBuf::from("rbtp-data"),
            sync_mode: SyncMode::Fast,
            network_id: 1,
            max_peers: 50,
            no_discover: false,
            nat: None,
            checkpoint: None,
            txpool: PoolConfig::default(),
            miner: MinerConfig::default(),
            trie: TrieConfig::default(),
            gpo: GpoConfig::default(),
            rpc_gas_cap: 50_000_000,
            tie_break: TieBreak::default(),
        }
    }
}

/// Local mining settings.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Mine at all.
    pub enabled: bool,
    /// Lower bound the miner targets for the block gas limit.
    pub gas_floor: u64,
    /// Upper bound the miner targets for the block gas limit.
    pub gas_ceil: u64,
    /// Minimum gas price for included transactions, in wei.
    pub gas_price: u128,
    /// Extra data stamped into mined headers.
    pub extra_data: Bytes,
    /// How often the work package is rebuilt, in seconds.
    pub recommit_secs: u64,
    /// Reward recipient.
    pub etherbase: Address,
    /// Sealer threads.
    pub threads: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gas_floor: 8_000_000,
            gas_ceil: 8_000_000,
            gas_price: 1_000_000_000,
            extra_data: Bytes::new(),
            recommit_secs: 3,
            etherbase: Address::ZERO,
            threads: 1,
        }
    }
}

/// Trie cache and pruning behavior.
#[derive(Debug, Clone)]
pub struct TrieConfig {
    /// Megabytes of clean node cache.
    pub clean_cache_mb: usize,
    /// Megabytes of dirty node cache before a forced flush.
    pub dirty_cache_mb: usize,
    /// Minutes between periodic trie flushes.
    pub timeout_minutes: u64,
    /// Archive mode: never prune old state.
    pub no_prune: bool,
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self { clean_cache_mb: 256, dirty_cache_mb: 256, timeout_minutes: 60, no_prune: false }
    }
}

/// Gas price oracle sampling.
#[derive(Debug, Clone)]
pub struct GpoConfig {
    /// Recent blocks sampled.
    pub blocks: usize,
    /// Percentile of sampled prices suggested.
    pub percentile: usize,
    /// Fallback suggestion in wei.
    pub default_price: u128,
}

impl Default for GpoConfig {
    fn default() -> Self {
        Self { blocks: 20, percentile: 60, default_price: 1_000_000_000 }
    }
}
