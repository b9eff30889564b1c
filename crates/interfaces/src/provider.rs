use rbtp_primitives::{
    Account, Address, Block, BlockBody, BlockHashOrNumber, BlockNumber, Header, Receipt,
    ReceiptWithBloom, SealedBlock, SealedHeader, B256, U256,
};
use std::fmt::Debug;

/// Result alias for provider reads.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors surfaced by storage providers.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The backing key-value store failed.
    #[error("database error: {0}")]
    Database(String),
    /// The cold store failed.
    #[error("freezer error: {0}")]
    Freezer(String),
    /// A header expected to exist was not found.
    #[error("header {0} not found")]
    HeaderNotFound(BlockHashOrNumber),
    /// A block body expected to exist was not found.
    #[error("body for block {0} not found")]
    BodyNotFound(B256),
    /// A total difficulty entry expected to exist was not found.
    #[error("total difficulty for block {0} not found")]
    TotalDifficultyNotFound(B256),
    /// A canonical index entry expected to exist was not found.
    #[error("no canonical hash for block number {0}")]
    CanonicalHashNotFound(BlockNumber),
    /// The on-disk database version is incompatible with this build.
    #[error("database version mismatch: found {found}, expected {expected}")]
    VersionMismatch {
        /// Version found on disk.
        found: u64,
        /// Version this build writes.
        expected: u64,
    },
}

/// Read access to headers and the canonical index.
#[auto_impl::auto_impl(&, Arc)]
pub trait HeaderProvider: Send + Sync {
    /// The header with the given hash.
    fn header(&self, hash: B256) -> ProviderResult<Option<Header>>;

    /// The canonical header at the given height.
    fn header_by_number(&self, number: BlockNumber) -> ProviderResult<Option<Header>>;

    /// The canonical hash at the given height.
    fn canonical_hash(&self, number: BlockNumber) -> ProviderResult<Option<B256>>;

    /// The total difficulty accumulated at the given hash.
    fn total_difficulty(&self, hash: B256) -> ProviderResult<Option<U256>>;

    /// The sealed header with the given hash.
    fn sealed_header(&self, hash: B256) -> ProviderResult<Option<SealedHeader>> {
        Ok(self.header(hash)?.map(|header| header.seal(hash)))
    }

    /// Resolves a hash-or-number reference to a header.
    fn header_by_hash_or_number(
        &self,
        id: BlockHashOrNumber,
    ) -> ProviderResult<Option<Header>> {
        match id {
            BlockHashOrNumber::Hash(hash) => self.header(hash),
            BlockHashOrNumber::Number(number) => self.header_by_number(number),
        }
    }
}

/// Snapshot of the canonical chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainInfo {
    /// Hash of the head block.
    pub best_hash: B256,
    /// Number of the head block.
    pub best_number: BlockNumber,
    /// Total difficulty at the head block.
    pub total_difficulty: U256,
}

/// Read access to full blocks and receipts.
#[auto_impl::auto_impl(&, Arc)]
pub trait BlockProvider: HeaderProvider {
    /// The body stored for the given block hash.
    fn block_body(&self, hash: B256) -> ProviderResult<Option<BlockBody>>;

    /// The receipts stored for the given block hash.
    fn receipts(&self, hash: B256) -> ProviderResult<Option<Vec<Receipt>>>;

    /// The current canonical tip.
    fn chain_info(&self) -> ProviderResult<ChainInfo>;

    /// A full block by hash or canonical number.
    fn block(&self, id: BlockHashOrNumber) -> ProviderResult<Option<Block>> {
        let Some(header) = self.header_by_hash_or_number(id)? else { return Ok(None) };
        let hash = header.hash_slow();
        let Some(body) = self.block_body(hash)? else { return Ok(None) };
        Ok(Some(body.into_block(header)))
    }
}

/// Read access to accounts at the current canonical state.
#[auto_impl::auto_impl(&, Arc)]
pub trait AccountProvider: Send + Sync {
    /// The account at `address`, if it exists.
    fn basic_account(&self, address: Address) -> ProviderResult<Option<Account>>;
}

/// How an imported block landed relative to the canonical chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The block extended or became the canonical chain.
    Canonical,
    /// The block was stored on a side chain.
    Side,
    /// The block (or its failure) was already known.
    AlreadyKnown,
}

/// Write access for components that feed blocks into the chain.
#[auto_impl::auto_impl(&, Arc)]
pub trait BlockImport: Send + Sync + Debug {
    /// Validates and inserts a single sealed block.
    fn insert_block(&self, block: SealedBlock) -> Result<ImportOutcome, crate::Error>;
}

/// The non-executing import paths bulk sync uses: header-only import for
/// light mode and body+receipt import below the fast-sync pivot.
#[auto_impl::auto_impl(&, Arc)]
pub trait FastImport: Send + Sync + Debug {
    /// Appends pre-validated canonical headers without bodies.
    fn insert_headers(&self, headers: &[SealedHeader]) -> Result<(), crate::Error>;

    /// Appends a block with its receipts, skipping execution. The body and
    /// receipts are still checked against the header commitments.
    fn insert_block_without_execution(
        &self,
        block: SealedBlock,
        receipts: Vec<ReceiptWithBloom>,
    ) -> Result<(), crate::Error>;

    /// Moves the canonical head to an already-imported block whose state
    /// arrived out of band.
    fn commit_fast_sync_head(&self, hash: B256) -> Result<(), crate::Error>;
}
