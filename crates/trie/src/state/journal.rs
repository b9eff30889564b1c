use crate::state::object::StateObject;
use rbtp_primitives::{Address, Bytes, StorageValue, B256, U256};

/// A reversible record of one state mutation.
///
/// Entries are pushed as mutations happen and popped in LIFO order when a
/// checkpoint is unwound.
#[derive(Debug, Clone)]
pub(crate) enum JournalEntry {
    /// An account object was created in this block.
    AccountCreated {
        /// The created account.
        address: Address,
    },
    /// An existing object was replaced wholesale by `create_account`.
    ObjectReplaced {
        /// The replaced account.
        address: Address,
        /// The object as it was before the replacement.
        prev: Option<Box<StateObject>>,
    },
    /// An account balance changed.
    BalanceChanged {
        /// The mutated account.
        address: Address,
        /// Balance before the change.
        prev: U256,
    },
    /// An account nonce changed.
    NonceChanged {
        /// The mutated account.
        address: Address,
        /// Nonce before the change.
        prev: u64,
    },
    /// A storage slot changed.
    StorageChanged {
        /// The mutated account.
        address: Address,
        /// The slot key.
        key: B256,
        /// Value before the change, if the slot was dirty already.
        prev: Option<StorageValue>,
    },
    /// Account code was set.
    CodeChanged {
        /// The mutated account.
        address: Address,
        /// Code before the change.
        prev_code: Option<Bytes>,
        /// Code hash before the change.
        prev_hash: B256,
    },
    /// An account was marked self-destructed.
    AccountDestructed {
        /// The destructed account.
        address: Address,
        /// Whether it was already marked.
        prev_suicided: bool,
        /// Balance before the destruct zeroed it.
        prev_balance: U256,
    },
    /// A log was appended.
    LogAdded,
    /// A preimage was recorded.
    PreimageAdded {
        /// Hash of the recorded preimage.
        hash: B256,
    },
}

/// The mutation journal with its checkpoint stack.
#[derive(Debug, Default)]
pub struct Journal {
    pub(crate) entries: Vec<JournalEntry>,
    /// Monotonic id handed out by `snapshot`.
    pub(crate) next_revision: usize,
    /// Open checkpoints: `(revision id, journal length at creation)`.
    pub(crate) revisions: Vec<(usize, usize)>,
}

impl Journal {
    pub(crate) fn push(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn snapshot(&mut self) -> usize {
        let id = self.next_revision;
        self.next_revision += 1;
        self.revisions.push((id, self.entries.len()));
        id
    }

    /// Finds the journal length for `id` and drops it and any younger
    /// checkpoints.
    pub(crate) fn rewind_to(&mut self, id: usize) -> Option<usize> {
        let pos = self.revisions.iter().position(|(rev, _)| *rev == id)?;
        let (_, len) = self.revisions[pos];
        self.revisions.truncate(pos);
        Some(len)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.revisions.clear();
    }
}
