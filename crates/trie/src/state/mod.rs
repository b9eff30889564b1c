//! The journaled account state layered over the secure trie.

use crate::{error::StateError, SecureTrie, TrieDb};
use alloy_rlp::{Decodable, Encodable};
use rbtp_primitives::{
    keccak256, Account, Address, Bytes, Log, StorageValue, TrieAccount, B256, U256,
};
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

mod journal;
mod object;

pub use journal::Journal;
use journal::JournalEntry;
pub use object::StateObject;

/// A mutable view of the world state at a given root.
///
/// Every mutation is journaled; [`StateDb::snapshot`] marks a checkpoint and
/// [`StateDb::revert_to`] unwinds to it in LIFO order. [`StateDb::commit`]
/// folds storage sub-tries into their accounts, writes dirty nodes to the
/// store and returns the new state root.
pub struct StateDb {
    db: Arc<dyn TrieDb>,
    trie: SecureTrie,
    /// Loaded objects; `None` marks an address known to be absent.
    objects: HashMap<Address, Option<StateObject>>,
    /// Addresses mutated since the last commit, in commit order.
    dirty: BTreeSet<Address>,
    journal: Journal,
    logs: Vec<Log>,
    preimages: HashMap<B256, Bytes>,
}

impl fmt::Debug for StateDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDb")
            .field("loaded", &self.objects.len())
            .field("dirty", &self.dirty.len())
            .finish_non_exhaustive()
    }
}

impl StateDb {
    /// Opens the state at `root`.
    pub fn at(root: B256, db: Arc<dyn TrieDb>) -> Self {
        Self {
            trie: SecureTrie::at_root(root, Arc::clone(&db)),
            db,
            objects: Default::default(),
            dirty: Default::default(),
            journal: Default::default(),
            logs: Default::default(),
            preimages: Default::default(),
        }
    }

    fn load(&mut self, address: Address) -> Result<(), StateError> {
        if self.objects.contains_key(&address) {
            return Ok(())
        }
        let object = match self.trie.get(address.as_slice())? {
            Some(bytes) => {
                let account = TrieAccount::decode(&mut bytes.as_slice())
                    .map_err(|_| crate::TrieError::Corrupt {
                        hash: keccak256(address),
                        message: "undecodable account leaf",
                    })?
                    .into();
                Some(StateObject::new(account, false))
            }
            None => None,
        };
        self.objects.insert(address, object);
        Ok(())
    }

    fn object_mut(&mut self, address: Address) -> Result<Option<&mut StateObject>, StateError> {
        self.load(address)?;
        Ok(self.objects.get_mut(&address).expect("loaded above").as_mut())
    }

    /// Returns the object, creating an empty one if the address is absent.
    fn object_or_create(&mut self, address: Address) -> Result<&mut StateObject, StateError> {
        self.load(address)?;
        let slot = self.objects.get_mut(&address).expect("loaded above");
        if slot.is_none() {
            *slot = Some(StateObject::new(Account::default(), true));
            self.journal.push(JournalEntry::AccountCreated { address });
        }
        self.dirty.insert(address);
        Ok(slot.as_mut().expect("just created"))
    }

    /// Whether an object exists for `address`.
    pub fn exists(&mut self, address: Address) -> Result<bool, StateError> {
        Ok(self.object_mut(address)?.is_some())
    }

    /// Whether the account is absent or empty per the pruning rule.
    pub fn is_empty(&mut self, address: Address) -> Result<bool, StateError> {
        Ok(self.object_mut(address)?.map_or(true, |obj| obj.account.is_empty()))
    }

    /// Copy-out of the account, if present.
    pub fn account(&mut self, address: Address) -> Result<Option<Account>, StateError> {
        Ok(self.object_mut(address)?.map(|obj| obj.account))
    }

    /// The account balance; zero for absent accounts.
    pub fn balance(&mut self, address: Address) -> Result<U256, StateError> {
        Ok(self.account(address)?.map_or(U256::ZERO, |acc| acc.balance))
    }

    /// The account nonce; zero for absent accounts.
    pub fn nonce(&mut self, address: Address) -> Result<u64, StateError> {
        Ok(self.account(address)?.map_or(0, |acc| acc.nonce))
    }

    /// The account bytecode, loaded through the content-addressed store.
    pub fn code(&mut self, address: Address) -> Result<Option<Bytes>, StateError> {
        let db = Arc::clone(&self.db);
        let Some(obj) = self.object_mut(address)? else { return Ok(None) };
        if obj.code.is_none() && obj.account.has_code() {
            let code = db
                .node(obj.account.code_hash)
                .ok_or(crate::TrieError::MissingNode(obj.account.code_hash))?;
            obj.code = Some(code.into());
        }
        Ok(obj.code.clone())
    }

    /// Reads a storage slot, dirty overlay first, then the committed
    /// sub-trie.
    pub fn storage(&mut self, address: Address, key: B256) -> Result<StorageValue, StateError> {
        let db = Arc::clone(&self.db);
        let Some(obj) = self.object_mut(address)? else { return Ok(StorageValue::ZERO) };

        if let Some(value) = obj.dirty_storage.get(&key) {
            return Ok(*value)
        }
        if let Some(value) = obj.storage_cache.get(&key) {
            return Ok(*value)
        }
        let value = if obj.created {
            StorageValue::ZERO
        } else {
            let storage_trie = SecureTrie::at_root(obj.account.storage_root, db);
            match storage_trie.get(key.as_slice())? {
                Some(bytes) => StorageValue::decode(&mut bytes.as_slice()).map_err(|_| {
                    crate::TrieError::Corrupt {
                        hash: obj.account.storage_root,
                        message: "undecodable storage leaf",
                    }
                })?,
                None => StorageValue::ZERO,
            }
        };
        obj.storage_cache.insert(key, value);
        Ok(value)
    }

    /// Creates a fresh account, carrying over any existing balance.
    pub fn create_account(&mut self, address: Address) -> Result<(), StateError> {
        self.load(address)?;
        let prev = self.objects.get(&address).expect("loaded above").clone();
        let balance = prev.as_ref().map_or(U256::ZERO, |obj| obj.account.balance);

        let mut object = StateObject::new(Account::default(), true);
        object.account.balance = balance;
        self.objects.insert(address, Some(object));
        self.journal.push(JournalEntry::ObjectReplaced { address, prev: prev.map(Box::new) });
        self.dirty.insert(address);
        Ok(())
    }

    /// Credits `amount` to the account, creating it if absent.
    pub fn add_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        let obj = self.object_or_create(address)?;
        let prev = obj.account.balance;
        obj.account.balance = prev + amount;
        self.journal.push(JournalEntry::BalanceChanged { address, prev });
        Ok(())
    }

    /// Debits `amount` from the account.
    pub fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        if amount.is_zero() {
            return Ok(())
        }
        let Some(obj) = self.object_mut(address)? else {
            return Err(StateError::InsufficientBalance(address))
        };
        let prev = obj.account.balance;
        if prev < amount {
            return Err(StateError::InsufficientBalance(address))
        }
        obj.account.balance = prev - amount;
        self.journal.push(JournalEntry::BalanceChanged { address, prev });
        self.dirty.insert(address);
        Ok(())
    }

    /// Sets the account nonce, creating the account if absent.
    pub fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), StateError> {
        let obj = self.object_or_create(address)?;
        let prev = obj.account.nonce;
        obj.account.nonce = nonce;
        self.journal.push(JournalEntry::NonceChanged { address, prev });
        Ok(())
    }

    /// Installs bytecode on the account, creating it if absent.
    pub fn set_code(&mut self, address: Address, code: Bytes) -> Result<(), StateError> {
        let obj = self.object_or_create(address)?;
        let prev_code = obj.code.take();
        let prev_hash = obj.account.code_hash;
        obj.account.code_hash = keccak256(&code);
        obj.code = Some(code);
        obj.code_dirty = true;
        self.journal.push(JournalEntry::CodeChanged { address, prev_code, prev_hash });
        Ok(())
    }

    /// Writes a storage slot, creating the account if absent.
    pub fn set_storage(
        &mut self,
        address: Address,
        key: B256,
        value: StorageValue,
    ) -> Result<(), StateError> {
        let obj = self.object_or_create(address)?;
        let prev = obj.dirty_storage.insert(key, value);
        self.journal.push(JournalEntry::StorageChanged { address, key, prev });
        Ok(())
    }

    /// Marks the account self-destructed, zeroing its balance. Returns
    /// whether the account existed.
    pub fn selfdestruct(&mut self, address: Address) -> Result<bool, StateError> {
        let Some(obj) = self.object_mut(address)? else { return Ok(false) };
        let entry = JournalEntry::AccountDestructed {
            address,
            prev_suicided: obj.suicided,
            prev_balance: obj.account.balance,
        };
        obj.suicided = true;
        obj.account.balance = U256::ZERO;
        self.journal.push(entry);
        self.dirty.insert(address);
        Ok(true)
    }

    /// Appends a log to the block log accumulator.
    pub fn add_log(&mut self, log: Log) {
        self.journal.push(JournalEntry::LogAdded);
        self.logs.push(log);
    }

    /// The logs accumulated so far.
    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    /// Drains the accumulated logs.
    pub fn take_logs(&mut self) -> Vec<Log> {
        std::mem::take(&mut self.logs)
    }

    /// Records the preimage of a hashed key.
    pub fn add_preimage(&mut self, hash: B256, preimage: Bytes) {
        if !self.preimages.contains_key(&hash) {
            self.journal.push(JournalEntry::PreimageAdded { hash });
            self.preimages.insert(hash, preimage);
        }
    }

    /// Drains the recorded preimages for persistence.
    pub fn take_preimages(&mut self) -> HashMap<B256, Bytes> {
        std::mem::take(&mut self.preimages)
    }

    /// Opens a checkpoint that [`StateDb::revert_to`] can unwind to.
    pub fn snapshot(&mut self) -> usize {
        self.journal.snapshot()
    }

    /// Unwinds every mutation made since `snapshot` was taken.
    pub fn revert_to(&mut self, snapshot: usize) -> Result<(), StateError> {
        let target =
            self.journal.rewind_to(snapshot).ok_or(StateError::UnknownSnapshot(snapshot))?;
        while self.journal.entries.len() > target {
            let entry = self.journal.entries.pop().expect("length checked");
            self.undo(entry);
        }
        Ok(())
    }

    fn undo(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::AccountCreated { address } => {
                self.objects.insert(address, None);
            }
            JournalEntry::ObjectReplaced { address, prev } => {
                self.objects.insert(address, prev.map(|boxed| *boxed));
            }
            JournalEntry::BalanceChanged { address, prev } => {
                if let Some(obj) = self.loaded_mut(address) {
                    obj.account.balance = prev;
                }
            }
            JournalEntry::NonceChanged { address, prev } => {
                if let Some(obj) = self.loaded_mut(address) {
                    obj.account.nonce = prev;
                }
            }
            JournalEntry::StorageChanged { address, key, prev } => {
                if let Some(obj) = self.loaded_mut(address) {
                    match prev {
                        Some(value) => obj.dirty_storage.insert(key, value),
                        None => obj.dirty_storage.remove(&key),
                    };
                }
            }
            JournalEntry::CodeChanged { address, prev_code, prev_hash } => {
                if let Some(obj) = self.loaded_mut(address) {
                    obj.code_dirty = prev_code.is_some();
                    obj.code = prev_code;
                    obj.account.code_hash = prev_hash;
                }
            }
            JournalEntry::AccountDestructed { address, prev_suicided, prev_balance } => {
                if let Some(obj) = self.loaded_mut(address) {
                    obj.suicided = prev_suicided;
                    obj.account.balance = prev_balance;
                }
            }
            JournalEntry::LogAdded => {
                self.logs.pop();
            }
            JournalEntry::PreimageAdded { hash } => {
                self.preimages.remove(&hash);
            }
        }
    }

    fn loaded_mut(&mut self, address: Address) -> Option<&mut StateObject> {
        self.objects.get_mut(&address).and_then(Option::as_mut)
    }

    /// Folds all dirty objects into the trie and returns the new state root.
    ///
    /// `prune_empty` removes accounts left empty, per the post-fork rule.
    /// Committing the same logical mutations twice yields the same root.
    pub fn commit(&mut self, prune_empty: bool) -> Result<B256, StateError> {
        let addresses: Vec<Address> = self.dirty.iter().copied().collect();
        for address in addresses {
            let Some(Some(obj)) = self.objects.get_mut(&address) else { continue };

            if obj.suicided || (prune_empty && obj.account.is_empty()) {
                self.trie.remove(address.as_slice())?;
                self.objects.insert(address, None);
                continue
            }

            if !obj.dirty_storage.is_empty() {
                let mut storage_trie = if obj.created {
                    SecureTrie::new(Arc::clone(&self.db))
                } else {
                    SecureTrie::at_root(obj.account.storage_root, Arc::clone(&self.db))
                };
                let mut slots: Vec<(B256, StorageValue)> = obj.dirty_storage.drain().collect();
                slots.sort_unstable_by_key(|(key, _)| *key);
                for (key, value) in slots {
                    if value.is_zero() {
                        storage_trie.remove(key.as_slice())?;
                    } else {
                        let mut encoded = Vec::new();
                        value.encode(&mut encoded);
                        storage_trie.insert(key.as_slice(), encoded)?;
                    }
                    obj.storage_cache.insert(key, value);
                }
                obj.account.storage_root = storage_trie.commit();
                obj.created = false;
            }

            if obj.code_dirty {
                if let Some(code) = &obj.code {
                    self.db.insert_node(obj.account.code_hash, code.to_vec());
                }
                obj.code_dirty = false;
            }

            let mut encoded = Vec::new();
            TrieAccount::from(obj.account).encode(&mut encoded);
            self.trie.insert(address.as_slice(), encoded)?;
        }

        let root = self.trie.commit();
        self.dirty.clear();
        self.journal.clear();
        Ok(root)
    }
}
