use rbtp_primitives::B256;

/// Errors that can occur while walking or mutating a trie.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TrieError {
    /// A node referenced by hash was not present in the backing store.
    #[error("missing trie node {0}")]
    MissingNode(B256),
    /// A stored node failed to decode.
    #[error("malformed trie node {hash}: {message}")]
    Corrupt {
        /// Hash the node was stored under.
        hash: B256,
        /// Decoder complaint.
        message: &'static str,
    },
}

/// Errors surfaced by the journaled state layer.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The underlying trie failed.
    #[error(transparent)]
    Trie(#[from] TrieError),
    /// A revert was requested for an unknown snapshot id.
    #[error("unknown state snapshot id {0}")]
    UnknownSnapshot(usize),
    /// A debit would push the balance below zero.
    #[error("insufficient balance for account {0}")]
    InsufficientBalance(rbtp_primitives::Address),
}
