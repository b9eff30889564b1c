#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Commonly used types in rbtp.
//!
//! This crate contains the btp chain's primitive types and helper functions:
//! headers, blocks, legacy transactions with EIP-155 signatures, receipts and
//! accounts, together with their canonical RLP encodings. Hashing an entity's
//! canonical encoding with keccak256 yields its identity.

mod account;
mod block;
pub mod constants;
mod error;
mod header;
mod peer;
mod receipt;
mod transaction;

pub use account::{Account, TrieAccount};
pub use block::{Block, BlockBody, BlockHashOrNumber, BlockNumHash, SealedBlock};
pub use constants::{EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH, KECCAK_EMPTY};
pub use error::{GotExpected, GotExpectedBoxed};
pub use header::{Head, Header, HeadersDirection, SealedHeader};
pub use peer::{PeerId, WithPeerId};
pub use receipt::{logs_bloom, Receipt, ReceiptWithBloom, TxOutcome};
pub use transaction::{
    recover_signers, sign_message, Signature, Transaction, TransactionKind, TransactionSigned,
    TransactionSignedEcRecovered,
};

/// A block hash.
pub type BlockHash = B256;
/// A block number.
pub type BlockNumber = u64;
/// A transaction hash: keccak256 of the RLP encoded signed transaction.
pub type TxHash = B256;
/// Chain identifier type (introduced in EIP-155).
pub type ChainId = u64;
/// An account storage key.
pub type StorageKey = B256;
/// An account storage value.
pub type StorageValue = U256;

pub use alloy_primitives::{
    address, b256, bloom, bytes, hex, keccak256, Address, Bloom, BloomInput, Bytes, Log, LogData,
    B256, B512, B64, U256, U64,
};
