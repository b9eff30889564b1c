//! Request, response and broadcast payloads of the btp protocol.

use alloy_rlp::{
    RlpDecodable, RlpDecodableWrapper, RlpEncodable, RlpEncodableWrapper,
};
use rbtp_primitives::{
    Block, BlockBody, BlockHashOrNumber, BlockNumber, Bytes, Header, HeadersDirection,
    ReceiptWithBloom, TransactionSigned, B256, U256,
};

/// An announced block hash with its height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct BlockHashNumber {
    /// The announced hash.
    pub hash: B256,
    /// The announced height.
    pub number: BlockNumber,
}

/// Announcement of newly available blocks by hash.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodableWrapper, RlpDecodableWrapper)]
pub struct NewBlockHashes(pub Vec<BlockHashNumber>);

/// A full new block with the announcing peer's total difficulty at it.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct NewBlock {
    /// The propagated block.
    pub block: Block,
    /// Total difficulty up to and including this block.
    pub total_difficulty: U256,
}

/// Broadcast transactions.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodableWrapper, RlpDecodableWrapper)]
pub struct Transactions(pub Vec<TransactionSigned>);

/// A request for a span of headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct GetBlockHeaders {
    /// The block to start from.
    pub start_block: BlockHashOrNumber,
    /// Maximum number of headers in the response.
    pub limit: u64,
    /// Headers to skip between each returned header.
    pub skip: u64,
    /// Whether numbers fall instead of rise from `start_block`.
    pub direction: HeadersDirection,
}

/// Headers answering a [`GetBlockHeaders`].
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodableWrapper, RlpDecodableWrapper)]
pub struct BlockHeaders(pub Vec<Header>);

/// A request for block bodies by hash.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodableWrapper, RlpDecodableWrapper)]
pub struct GetBlockBodies(pub Vec<B256>);

/// Bodies answering a [`GetBlockBodies`].
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodableWrapper, RlpDecodableWrapper)]
pub struct BlockBodies(pub Vec<BlockBody>);

/// A request for state trie nodes or code blobs by hash.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodableWrapper, RlpDecodableWrapper)]
pub struct GetNodeData(pub Vec<B256>);

/// Raw node blobs answering a [`GetNodeData`].
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodableWrapper, RlpDecodableWrapper)]
pub struct NodeData(pub Vec<Bytes>);

/// A request for block receipts by block hash.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodableWrapper, RlpDecodableWrapper)]
pub struct GetReceipts(pub Vec<B256>);

/// Per-block receipt lists answering a [`GetReceipts`].
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodableWrapper, RlpDecodableWrapper)]
pub struct Receipts(pub Vec<Vec<ReceiptWithBloom>>);
