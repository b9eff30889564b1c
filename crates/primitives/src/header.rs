use crate::{
    constants::EMPTY_OMMER_ROOT_HASH, keccak256, Address, BlockHash, BlockNumber, Bloom, Bytes,
    B256, B64, EMPTY_ROOT_HASH, U256,
};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use std::ops::Deref;

/// The fixed-width metadata of a block.
///
/// The header identity is the keccak256 hash of its canonical RLP encoding.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Header {
    /// Hash of the parent block's header.
    pub parent_hash: B256,
    /// keccak256 of the RLP encoded ommers list.
    pub ommers_hash: B256,
    /// Address collecting the block reward and fees.
    pub beneficiary: Address,
    /// Root of the account trie after applying this block.
    pub state_root: B256,
    /// Root of the trie built from the block's ordered transactions.
    pub transactions_root: B256,
    /// Root of the trie built from the block's ordered receipts.
    pub receipts_root: B256,
    /// Union of the bloom filters of all receipts in the block.
    pub logs_bloom: Bloom,
    /// Proof-of-work difficulty of this block.
    pub difficulty: U256,
    /// Number of ancestor blocks, genesis being zero.
    pub number: BlockNumber,
    /// Gas ceiling declared by the miner.
    pub gas_limit: u64,
    /// Total gas consumed by the block's transactions.
    pub gas_used: u64,
    /// Unix timestamp at which the block was sealed.
    pub timestamp: u64,
    /// Arbitrary miner-supplied bytes, at most 32 post-genesis.
    pub extra_data: Bytes,
    /// Seal mix digest, paired with `nonce`.
    pub mix_hash: B256,
    /// 8-byte seal nonce.
    pub nonce: B64,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            parent_hash: B256::ZERO,
            ommers_hash: EMPTY_OMMER_ROOT_HASH,
            beneficiary: Address::ZERO,
            state_root: EMPTY_ROOT_HASH,
            transactions_root: EMPTY_ROOT_HASH,
            receipts_root: EMPTY_ROOT_HASH,
            logs_bloom: Bloom::ZERO,
            difficulty: U256::ZERO,
            number: 0,
            gas_limit: 0,
            gas_used: 0,
            timestamp: 0,
            extra_data: Bytes::new(),
            mix_hash: B256::ZERO,
            nonce: B64::ZERO,
        }
    }
}

impl Header {
    /// Heavy function that re-hashes the header each call.
    ///
    /// Prefer [`SealedHeader`] if the hash is needed more than once.
    pub fn hash_slow(&self) -> B256 {
        let mut out = Vec::<u8>::new();
        self.encode(&mut out);
        keccak256(&out)
    }

    /// Seal the header with its computed hash.
    pub fn seal_slow(self) -> SealedHeader {
        let hash = self.hash_slow();
        SealedHeader { header: self, hash }
    }

    /// Seal the header with a known hash.
    ///
    /// WARNING: the hash is not verified against the header.
    pub fn seal(self, hash: B256) -> SealedHeader {
        SealedHeader { header: self, hash }
    }

    /// Returns whether the block carries neither transactions nor ommers,
    /// judged from the header roots alone.
    pub fn is_empty(&self) -> bool {
        self.transactions_root == EMPTY_ROOT_HASH && self.ommers_hash == EMPTY_OMMER_ROOT_HASH
    }

    /// The hash the seal search runs over: the header without its
    /// `(mix_hash, nonce)` pair.
    pub fn seal_hash(&self) -> B256 {
        #[derive(RlpEncodable)]
        struct SansSeal<'a> {
            parent_hash: &'a B256,
            ommers_hash: &'a B256,
            beneficiary: &'a Address,
            state_root: &'a B256,
            transactions_root: &'a B256,
            receipts_root: &'a B256,
            logs_bloom: &'a Bloom,
            difficulty: &'a U256,
            number: BlockNumber,
            gas_limit: u64,
            gas_used: u64,
            timestamp: u64,
            extra_data: &'a Bytes,
        }

        let sans_seal = SansSeal {
            parent_hash: &self.parent_hash,
            ommers_hash: &self.ommers_hash,
            beneficiary: &self.beneficiary,
            state_root: &self.state_root,
            transactions_root: &self.transactions_root,
            receipts_root: &self.receipts_root,
            logs_bloom: &self.logs_bloom,
            difficulty: &self.difficulty,
            number: self.number,
            gas_limit: self.gas_limit,
            gas_used: self.gas_used,
            timestamp: self.timestamp,
            extra_data: &self.extra_data,
        };
        let mut out = Vec::<u8>::new();
        sans_seal.encode(&mut out);
        keccak256(&out)
    }
}

/// A [`Header`] paired with its memoized hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedHeader {
    /// The wrapped header.
    header: Header,
    /// The memoized keccak256 of the header.
    hash: BlockHash,
}

impl SealedHeader {
    /// Creates a sealed header from a header and its hash.
    pub const fn new(header: Header, hash: BlockHash) -> Self {
        Self { header, hash }
    }

    /// The memoized header hash.
    pub const fn hash(&self) -> BlockHash {
        self.hash
    }

    /// Returns a reference to the wrapped header.
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Unseal, dropping the memoized hash.
    pub fn unseal(self) -> Header {
        self.header
    }

    /// Splits into header and hash.
    pub fn split(self) -> (Header, BlockHash) {
        (self.header, self.hash)
    }

    /// The block's number and hash as a [`crate::BlockNumHash`].
    pub const fn num_hash(&self) -> crate::BlockNumHash {
        crate::BlockNumHash { number: self.header.number, hash: self.hash }
    }
}

impl Default for SealedHeader {
    fn default() -> Self {
        Header::default().seal_slow()
    }
}

impl Deref for SealedHeader {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}

impl Encodable for SealedHeader {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.header.encode(out)
    }

    fn length(&self) -> usize {
        self.header.length()
    }
}

impl Decodable for SealedHeader {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let started = *buf;
        let header = Header::decode(buf)?;
        let consumed = started.len() - buf.len();
        let hash = keccak256(&started[..consumed]);
        Ok(Self { header, hash })
    }
}

/// Direction in which a headers request walks the chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum HeadersDirection {
    /// Ascending block numbers.
    #[default]
    Rising,
    /// Descending block numbers.
    Falling,
}

impl HeadersDirection {
    /// Whether block numbers are falling.
    pub const fn is_falling(&self) -> bool {
        matches!(self, Self::Falling)
    }

    /// Whether block numbers are rising.
    pub const fn is_rising(&self) -> bool {
        matches!(self, Self::Rising)
    }
}

// The wire encodes the direction as the `reverse` boolean of a headers
// request.
impl Encodable for HeadersDirection {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.is_falling().encode(out)
    }

    fn length(&self) -> usize {
        self.is_falling().length()
    }
}

impl Decodable for HeadersDirection {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let falling: bool = Decodable::decode(buf)?;
        Ok(if falling { Self::Falling } else { Self::Rising })
    }
}

/// Describes the current head block.
///
/// Carries the data needed for `Status` handshakes and fork-ID checks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    /// The number of the head block.
    pub number: BlockNumber,
    /// The hash of the head block.
    pub hash: B256,
    /// The difficulty of the head block.
    pub difficulty: U256,
    /// The total difficulty at the head block.
    pub total_difficulty: U256,
    /// The timestamp of the head block.
    pub timestamp: u64,
}
