//! Chain-wide constants.

use crate::{b256, B256};

/// keccak256 of an empty byte slice. Externally owned accounts carry this as
/// their code hash.
pub const KECCAK_EMPTY: B256 =
    b256!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

/// Root hash of an empty trie.
pub const EMPTY_ROOT_HASH: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// keccak256 of the RLP encoding of an empty ommer list.
pub const EMPTY_OMMER_ROOT_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// Divisor bounding how much the gas limit may drift between parent and child.
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

/// Smallest gas limit a block may declare.
pub const MIN_GAS_LIMIT: u64 = 5000;

/// Maximum size of a post-genesis header's extra data field.
pub const MAXIMUM_EXTRA_DATA_SIZE: usize = 32;

/// How far into the future a header timestamp may drift, in seconds.
pub const ALLOWED_FUTURE_BLOCK_TIME: u64 = 15;

/// Base gas charged for every transaction.
pub const TX_GAS: u64 = 21_000;

/// Gas charged for a contract-creating transaction, replacing [`TX_GAS`].
pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;

/// Gas charged per zero byte of transaction input data.
pub const TX_DATA_ZERO_GAS: u64 = 4;

/// Gas charged per non-zero byte of transaction input data.
pub const TX_DATA_NON_ZERO_GAS: u64 = 68;

/// Number of wei in one gwei.
pub const GWEI: u128 = 1_000_000_000;

/// Number of wei in one btp.
pub const WEI_PER_BTP: u128 = 1_000_000_000_000_000_000;

/// How many generations back an ommer may reach.
pub const MAX_OMMER_DEPTH: u64 = 7;

/// Maximum number of ommers a single block may include.
pub const MAX_OMMERS_PER_BLOCK: usize = 2;
