#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! The btp wire protocol.
//!
//! Message set of the versioned `btp` sub-protocol: `btp/63` and `btp/64`,
//! where 64 adds the fork id to the `Status` handshake. Codes are never
//! renumbered between versions. All payloads use the chain's recursive
//! length-prefix encoding.

mod message;
mod status;
mod types;
mod version;

pub use message::{BtpMessage, BtpMessageId, MessageError, ProtocolMessage};
pub use status::Status;
pub use types::{
    BlockBodies, BlockHashNumber, BlockHeaders, GetBlockBodies, GetBlockHeaders, GetNodeData,
    GetReceipts, NewBlock, NewBlockHashes, NodeData, Receipts, Transactions,
};
pub use version::BtpVersion;
