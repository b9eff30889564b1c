use rbtp_primitives::{Account, Bytes, StorageValue, B256};

/// An account loaded into the state layer, with its in-flight mutations.
#[derive(Debug, Clone)]
pub struct StateObject {
    /// The account as currently mutated.
    pub account: Account,
    /// Bytecode, once loaded or set.
    pub(crate) code: Option<Bytes>,
    /// Whether `code` differs from what the store holds.
    pub(crate) code_dirty: bool,
    /// Slots written in this block, overlaying the committed storage trie.
    pub(crate) dirty_storage: std::collections::HashMap<B256, StorageValue>,
    /// Committed slot values already read through, to spare trie walks.
    pub(crate) storage_cache: std::collections::HashMap<B256, StorageValue>,
    /// Marked self-destructed; removed from the trie at commit.
    pub(crate) suicided: bool,
    /// Created in this block, so its storage trie starts empty.
    pub(crate) created: bool,
}

impl StateObject {
    pub(crate) fn new(account: Account, created: bool) -> Self {
        Self {
            account,
            code: None,
            code_dirty: false,
            dirty_storage: Default::default(),
            storage_cache: Default::default(),
            suicided: false,
            created,
        }
    }
}
