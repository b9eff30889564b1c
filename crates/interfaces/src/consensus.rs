use crate::executor::InvalidTransactionError;
use rbtp_primitives::{
    BlockHash, BlockNumber, GotExpected, GotExpectedBoxed, Header, SealedBlock, SealedHeader, B256,
    U256,
};
use rbtp_trie::{StateDb, StateError};
use std::fmt::Debug;

/// The consensus engine contract: header validity, seal verification,
/// difficulty retargeting and reward finalization.
#[auto_impl::auto_impl(&, Arc)]
pub trait Consensus: Debug + Send + Sync {
    /// Validates a header in isolation: bounds that need no parent or state.
    fn validate_header(&self, header: &SealedHeader) -> Result<(), ConsensusError>;

    /// Validates a header against its parent: number, timestamp, gas-limit
    /// drift and difficulty retarget.
    ///
    /// **This should not be called for the genesis block.**
    fn validate_header_against_parent(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ConsensusError>;

    /// Validates an ascending chain of headers: the first on its own, every
    /// subsequent one against its predecessor.
    fn validate_header_range(&self, headers: &[SealedHeader]) -> Result<(), ConsensusError> {
        let mut headers = headers.iter();
        let Some(mut parent) = headers.next() else { return Ok(()) };
        self.validate_header(parent)?;
        for child in headers {
            self.validate_header(child)?;
            self.validate_header_against_parent(child, parent)?;
            parent = child;
        }
        Ok(())
    }

    /// Verifies the proof-of-work seal: the `(mix_hash, nonce)` pair against
    /// the difficulty target.
    fn validate_seal(&self, header: &SealedHeader) -> Result<(), ConsensusError>;

    /// Validates a block body against its header before execution:
    /// transaction root, ommers hash and the ommer inclusion rules.
    fn validate_block(&self, block: &SealedBlock) -> Result<(), ConsensusError>;

    /// The difficulty a child of `parent` sealed at `timestamp` must carry.
    fn calc_difficulty(&self, parent: &SealedHeader, timestamp: u64) -> U256;

    /// Credits the block reward and ommer bonuses into `state`.
    ///
    /// The caller commits the state afterwards and compares the resulting
    /// root against the header.
    fn finalize(
        &self,
        header: &Header,
        ommers: &[Header],
        state: &mut StateDb,
    ) -> Result<(), ConsensusError>;
}

/// Consensus errors.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// The gas used in the header exceeds its own gas limit.
    #[error("block used gas ({gas_used}) is greater than gas limit ({gas_limit})")]
    HeaderGasUsedExceedsGasLimit {
        /// The gas used in the block header.
        gas_used: u64,
        /// The gas limit in the block header.
        gas_limit: u64,
    },

    /// The declared gas limit is below the protocol minimum.
    #[error("gas limit {gas_limit} is below the minimum")]
    GasLimitBelowMinimum {
        /// The gas limit in the block header.
        gas_limit: u64,
    },

    /// The child gas limit grew faster than the bound divisor allows.
    #[error("child gas_limit {child_gas_limit} max increase is {parent_gas_limit}/1024")]
    GasLimitInvalidIncrease {
        /// The parent gas limit.
        parent_gas_limit: u64,
        /// The child gas limit.
        child_gas_limit: u64,
    },

    /// The child gas limit shrank faster than the bound divisor allows.
    #[error("child gas_limit {child_gas_limit} max decrease is {parent_gas_limit}/1024")]
    GasLimitInvalidDecrease {
        /// The parent gas limit.
        parent_gas_limit: u64,
        /// The child gas limit.
        child_gas_limit: u64,
    },

    /// The block's timestamp is not strictly after its parent's.
    #[error("block timestamp {timestamp} is not after parent timestamp {parent_timestamp}")]
    TimestampIsInPast {
        /// The parent block's timestamp.
        parent_timestamp: u64,
        /// The block's timestamp.
        timestamp: u64,
    },

    /// The block's timestamp drifts too far past our clock.
    #[error("block timestamp {timestamp} is in the future compared to our clock time {present_timestamp}")]
    TimestampIsInFuture {
        /// The block's timestamp.
        timestamp: u64,
        /// The current timestamp.
        present_timestamp: u64,
    },

    /// The block number does not follow the parent's.
    #[error(
        "block number {block_number} does not match parent block number {parent_block_number}"
    )]
    ParentBlockNumberMismatch {
        /// The parent block number.
        parent_block_number: BlockNumber,
        /// The block number.
        block_number: BlockNumber,
    },

    /// The parent of a block is not known.
    #[error("block parent [hash={hash}] is not known")]
    ParentUnknown {
        /// The hash of the unknown parent block.
        hash: BlockHash,
    },

    /// The parent hash does not match the expected parent hash.
    #[error("mismatched parent hash: {0}")]
    ParentHashMismatch(GotExpectedBoxed<B256>),

    /// The header's difficulty does not match the retarget calculation.
    #[error("mismatched block difficulty: {0}")]
    DifficultyDiff(GotExpectedBoxed<U256>),

    /// The `(mix_hash, nonce)` pair fails the proof-of-work check.
    #[error("invalid proof-of-work seal")]
    InvalidSeal,

    /// The extra data field exceeds the allowed size.
    #[error("extra data {len} exceeds max length")]
    ExtraDataExceedsMax {
        /// The length of the extra data.
        len: usize,
    },

    /// The ommers hash in the header does not match the body.
    #[error("mismatched block ommer hash: {0}")]
    BodyOmmersHashDiff(GotExpectedBoxed<B256>),

    /// The transaction root in the header does not match the body.
    #[error("mismatched block transaction root: {0}")]
    BodyTransactionRootDiff(GotExpectedBoxed<B256>),

    /// The state root in the header does not match the executed state.
    #[error("mismatched block state root: {0}")]
    BodyStateRootDiff(GotExpectedBoxed<B256>),

    /// The receipts root in the header does not match the executed receipts.
    #[error("mismatched block receipts root: {0}")]
    BodyReceiptsRootDiff(GotExpectedBoxed<B256>),

    /// The header bloom does not match the union of receipt blooms.
    #[error("mismatched block bloom filter")]
    BodyBloomDiff,

    /// The header gas used does not match the executed gas.
    #[error("mismatched block gas used: {0}")]
    BlockGasUsedDiff(GotExpected<u64>),

    /// A block included more ommers than allowed.
    #[error("too many ommers: {count}")]
    TooManyOmmers {
        /// Number of ommers in the block.
        count: usize,
    },

    /// An ommer reaches back further than the allowed depth.
    #[error("ommer {hash} is too old")]
    OmmerTooOld {
        /// The ommer's hash.
        hash: BlockHash,
    },

    /// The same ommer was included twice, or the ommer is an ancestor.
    #[error("duplicate or ancestral ommer {hash}")]
    DuplicateOmmer {
        /// The ommer's hash.
        hash: BlockHash,
    },

    /// An included ommer's header fails validation.
    #[error("invalid ommer header {hash}")]
    InvalidOmmerHeader {
        /// The ommer's hash.
        hash: BlockHash,
    },

    /// A transaction signer failed to recover.
    #[error("transaction signer recovery error")]
    TransactionSignerRecoveryError,

    /// A transaction violates consensus rules.
    #[error(transparent)]
    InvalidTransaction(#[from] InvalidTransactionError),

    /// State access failed while finalizing.
    #[error(transparent)]
    State(#[from] StateError),
}
