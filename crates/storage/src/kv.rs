use parking_lot::RwLock;
use rbtp_interfaces::provider::{ProviderError, ProviderResult};
use std::{collections::BTreeMap, fmt};

/// One operation of an atomic write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Store `value` under `key`.
    Put(Vec<u8>, Vec<u8>),
    /// Remove `key`.
    Delete(Vec<u8>),
}

/// The hot-tier key-value abstraction.
///
/// Implementations must apply [`KeyValueStore::write_batch`] atomically: a
/// crash mid-batch may lose the whole batch but never half of it.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Reads the value stored under `key`.
    fn get(&self, key: &[u8]) -> ProviderResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`.
    fn put(&self, key: &[u8], value: &[u8]) -> ProviderResult<()>;

    /// Removes `key` if present.
    fn delete(&self, key: &[u8]) -> ProviderResult<()>;

    /// Whether `key` is present.
    fn has(&self, key: &[u8]) -> ProviderResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Applies all operations as one atomic unit.
    fn write_batch(&self, batch: Vec<BatchOp>) -> ProviderResult<()>;
}

/// An in-memory [`KeyValueStore`] used by tests and light tooling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// A snapshot of every entry, as compaction and tooling need.
    pub fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.map.read().iter().map(|(key, value)| (key.clone(), value.clone())).collect()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> ProviderResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> ProviderResult<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> ProviderResult<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn write_batch(&self, batch: Vec<BatchOp>) -> ProviderResult<()> {
        let mut map = self.map.write();
        for op in batch {
            match op {
                BatchOp::Put(key, value) => {
                    map.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// Maps an I/O failure into the provider error taxonomy.
pub(crate) fn io_err(err: std::io::Error) -> ProviderError {
    ProviderError::Database(err.to_string())
}
