use crate::{Header, SealedHeader, TransactionSigned, B256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use std::{fmt, ops::Deref};

/// A block: header plus the transactions and ommers that make up its body.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct Block {
    /// The block header.
    pub header: Header,
    /// Transactions executed in this block.
    pub body: Vec<TransactionSigned>,
    /// Stale headers included for partial reward.
    pub ommers: Vec<Header>,
}

impl Block {
    /// Seals the block with its computed header hash.
    pub fn seal_slow(self) -> SealedBlock {
        SealedBlock {
            header: self.header.seal_slow(),
            body: self.body,
            ommers: self.ommers,
        }
    }
}

/// The transactions and ommers of a block, as exchanged on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct BlockBody {
    /// Transactions in the block.
    pub transactions: Vec<TransactionSigned>,
    /// Ommer headers in the block.
    pub ommers: Vec<Header>,
}

impl BlockBody {
    /// Joins the body with a header into a [`Block`].
    pub fn into_block(self, header: Header) -> Block {
        Block { header, body: self.transactions, ommers: self.ommers }
    }
}

/// A block with a memoized header hash.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct SealedBlock {
    /// The sealed header.
    pub header: SealedHeader,
    /// Transactions executed in this block.
    pub body: Vec<TransactionSigned>,
    /// Stale headers included for partial reward.
    pub ommers: Vec<Header>,
}

impl SealedBlock {
    /// The memoized header hash.
    pub const fn hash(&self) -> B256 {
        self.header.hash()
    }

    /// Unseals the block.
    pub fn unseal(self) -> Block {
        Block { header: self.header.unseal(), body: self.body, ommers: self.ommers }
    }

    /// Splits off the body, leaving the sealed header.
    pub fn split_body(self) -> (SealedHeader, BlockBody) {
        (self.header, BlockBody { transactions: self.body, ommers: self.ommers })
    }

    /// Approximate in-memory size, used for download buffer accounting.
    pub fn size_hint(&self) -> usize {
        std::mem::size_of::<Header>() +
            self.body.iter().map(|tx| tx.size_hint()).sum::<usize>() +
            self.ommers.len() * std::mem::size_of::<Header>()
    }
}

impl Deref for SealedBlock {
    type Target = SealedHeader;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}

/// A block number paired with the block's hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, RlpEncodable, RlpDecodable)]
pub struct BlockNumHash {
    /// The block number.
    pub number: u64,
    /// The block hash.
    pub hash: B256,
}

impl fmt::Display for BlockNumHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

/// Either a block hash or a block number, as accepted by headers requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockHashOrNumber {
    /// A block hash.
    Hash(B256),
    /// A block number.
    Number(u64),
}

impl BlockHashOrNumber {
    /// Returns the block number if this is a number.
    pub const fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(number) => Some(*number),
            Self::Hash(_) => None,
        }
    }
}

impl From<B256> for BlockHashOrNumber {
    fn from(hash: B256) -> Self {
        Self::Hash(hash)
    }
}

impl From<u64> for BlockHashOrNumber {
    fn from(number: u64) -> Self {
        Self::Number(number)
    }
}

impl fmt::Display for BlockHashOrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash(hash) => write!(f, "hash {hash}"),
            Self::Number(number) => write!(f, "number {number}"),
        }
    }
}

// A single RLP item: a 32-byte string is a hash, anything shorter is a
// big-endian number.
impl Encodable for BlockHashOrNumber {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        match self {
            Self::Hash(hash) => hash.encode(out),
            Self::Number(number) => number.encode(out),
        }
    }

    fn length(&self) -> usize {
        match self {
            Self::Hash(hash) => hash.length(),
            Self::Number(number) => number.length(),
        }
    }
}

impl Decodable for BlockHashOrNumber {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = buf.first().copied().ok_or(alloy_rlp::Error::InputTooShort)?;
        // a 32-byte string is prefixed with 0x80 + 32
        if header == 0x80 + 32 {
            Ok(Self::Hash(B256::decode(buf)?))
        } else {
            Ok(Self::Number(u64::decode(buf)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_rlp_roundtrip() {
        let block = Block {
            header: Header { number: 3, gas_limit: 1_000_000, ..Default::default() },
            body: Vec::new(),
            ommers: vec![Header { number: 2, ..Default::default() }],
        };
        let mut encoded = Vec::new();
        block.encode(&mut encoded);
        assert_eq!(Block::decode(&mut encoded.as_slice()).unwrap(), block);
    }

    #[test]
    fn hash_or_number_roundtrip() {
        for value in [
            BlockHashOrNumber::Number(0),
            BlockHashOrNumber::Number(u64::MAX),
            BlockHashOrNumber::Hash(B256::repeat_byte(0x22)),
        ] {
            let mut encoded = Vec::new();
            value.encode(&mut encoded);
            assert_eq!(BlockHashOrNumber::decode(&mut encoded.as_slice()).unwrap(), value);
        }
    }
}
