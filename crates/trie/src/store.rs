use parking_lot::RwLock;
use rbtp_primitives::B256;
use std::{collections::HashMap, fmt, sync::Arc};

/// A content-addressed node store: trie nodes (and contract code) keyed by
/// the keccak256 of their bytes.
pub trait TrieDb: Send + Sync + fmt::Debug {
    /// Reads the bytes stored under `hash`.
    fn node(&self, hash: B256) -> Option<Vec<u8>>;

    /// Stores `bytes` under `hash`.
    ///
    /// Nodes are content addressed, so double inserts are harmless.
    fn insert_node(&self, hash: B256, bytes: Vec<u8>);

    /// Whether `hash` is present.
    fn contains_node(&self, hash: B256) -> bool {
        self.node(hash).is_some()
    }
}

impl<T: TrieDb + ?Sized> TrieDb for Arc<T> {
    fn node(&self, hash: B256) -> Option<Vec<u8>> {
        (**self).node(hash)
    }

    fn insert_node(&self, hash: B256, bytes: Vec<u8>) {
        (**self).insert_node(hash, bytes)
    }
}

/// An in-memory [`TrieDb`], used by tests and as the scratch store for
/// one-shot root calculations.
#[derive(Debug, Default)]
pub struct MemoryTrieDb {
    nodes: RwLock<HashMap<B256, Vec<u8>>>,
}

impl MemoryTrieDb {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether the store holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl TrieDb for MemoryTrieDb {
    fn node(&self, hash: B256) -> Option<Vec<u8>> {
        self.nodes.read().get(&hash).cloned()
    }

    fn insert_node(&self, hash: B256, bytes: Vec<u8>) {
        self.nodes.write().insert(hash, bytes);
    }
}
