#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Merkle Patricia trie and journaled state for rbtp.
//!
//! The trie is a DAG of content-addressed nodes: every node is stored under
//! the keccak256 of its RLP encoding, with the usual exception that encodings
//! shorter than 32 bytes are embedded in their parent. [`SecureTrie`] hashes
//! keys before insertion so attacker-chosen keys cannot degrade the tree.
//!
//! [`StateDb`] layers accounts and per-account storage sub-tries on top,
//! journaling every mutation so intra-transaction checkpoints can be unwound
//! in LIFO order.

mod error;
mod nibbles;
mod node;
pub mod root;
mod state;
mod store;
mod trie;

pub use error::{StateError, TrieError};
pub use nibbles::Nibbles;
pub use node::decode_node_refs;
pub use state::{Journal, StateDb, StateObject};
pub use store::{MemoryTrieDb, TrieDb};
pub use trie::{SecureTrie, Trie};
