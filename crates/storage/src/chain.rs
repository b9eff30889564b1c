use crate::{
    freezer::{Freezer, FreezerTable},
    kv::{BatchOp, KeyValueStore},
    schema,
};
use alloy_rlp::{Decodable, Encodable};
use parking_lot::Mutex;
use rbtp_interfaces::provider::{
    BlockProvider, ChainInfo, HeaderProvider, ProviderError, ProviderResult,
};
use rbtp_primitives::{
    BlockBody, BlockHash, BlockNumber, Header, Receipt, ReceiptWithBloom, SealedBlock, B256, U256,
};
use rbtp_trie::TrieDb;
use tracing::info;

/// The typed storage provider over the hot tier and the optional freezer.
///
/// All multi-entry writes go through atomic batches; the canonical index is
/// only rewritten by the chain manager during head updates and reorgs.
#[derive(Debug)]
pub struct ChainStorage<S> {
    db: S,
    freezer: Option<Mutex<Freezer>>,
}

impl<S: KeyValueStore> ChainStorage<S> {
    /// Opens the storage, validating the on-disk schema version.
    ///
    /// A fresh database is stamped with [`schema::DB_VERSION`]; an existing
    /// database with a different version is rejected, since no migration
    /// path applies.
    pub fn open(db: S, freezer: Option<Freezer>) -> ProviderResult<Self> {
        match db.get(schema::VERSION_KEY)? {
            None => {
                db.put(schema::VERSION_KEY, &schema::DB_VERSION.to_be_bytes())?;
            }
            Some(raw) => {
                let found = decode_u64(&raw)?;
                if found != schema::DB_VERSION {
                    return Err(ProviderError::VersionMismatch {
                        found,
                        expected: schema::DB_VERSION,
                    })
                }
            }
        }
        Ok(Self { db, freezer: freezer.map(Mutex::new) })
    }

    /// The underlying hot store.
    pub fn db(&self) -> &S {
        &self.db
    }

    /// Number of blocks already migrated to the cold tier.
    pub fn frozen(&self) -> u64 {
        self.freezer.as_ref().map_or(0, |freezer| freezer.lock().frozen())
    }

    // === writes ===

    /// Persists everything a validated block leaves behind: header, body,
    /// receipts, total difficulty and transaction lookup entries, in one
    /// atomic batch. The canonical index is not touched.
    pub fn insert_block(
        &self,
        block: &SealedBlock,
        td: U256,
        receipts: &[ReceiptWithBloom],
    ) -> ProviderResult<()> {
        let hash = block.hash();
        let number = block.number;
        let mut batch = Vec::with_capacity(5 + block.body.len());

        batch.push(BatchOp::Put(schema::header_key(number, hash), encode(block.header())));
        batch.push(BatchOp::Put(
            schema::header_number_key(hash),
            number.to_be_bytes().to_vec(),
        ));

        let body = BlockBody { transactions: block.body.clone(), ommers: block.ommers.clone() };
        batch.push(BatchOp::Put(schema::body_key(number, hash), encode(&body)));

        let mut receipts_rlp = Vec::new();
        alloy_rlp::encode_list(receipts, &mut receipts_rlp);
        batch.push(BatchOp::Put(schema::receipts_key(number, hash), receipts_rlp));

        batch.push(BatchOp::Put(schema::td_key(number, hash), encode(&td)));

        for (index, tx) in block.body.iter().enumerate() {
            batch.push(BatchOp::Put(
                schema::tx_lookup_key(tx.hash()),
                encode(&TxLookupEntry { block_hash: hash, index: index as u64 }),
            ));
        }

        self.db.write_batch(batch)
    }

    /// Writes a header (and its number index) without a body, as headers
    /// arrive during light and fast sync.
    pub fn insert_header(&self, header: &Header, hash: BlockHash, td: U256) -> ProviderResult<()> {
        self.db.write_batch(vec![
            BatchOp::Put(schema::header_key(header.number, hash), encode(header)),
            BatchOp::Put(schema::header_number_key(hash), header.number.to_be_bytes().to_vec()),
            BatchOp::Put(schema::td_key(header.number, hash), encode(&td)),
        ])
    }

    /// Points the canonical index entry for `number` at `hash`.
    pub fn set_canonical_hash(&self, number: BlockNumber, hash: BlockHash) -> ProviderResult<()> {
        self.db.put(&schema::canonical_key(number), hash.as_slice())
    }

    /// Drops the canonical index entry for `number`.
    pub fn clear_canonical_hash(&self, number: BlockNumber) -> ProviderResult<()> {
        self.db.delete(&schema::canonical_key(number))
    }

    /// Drops the header, body, receipts and difficulty of a block from the
    /// hot tier, as `set_head` rewinds.
    pub fn delete_block(&self, number: BlockNumber, hash: BlockHash) -> ProviderResult<()> {
        self.db.write_batch(vec![
            BatchOp::Delete(schema::header_key(number, hash)),
            BatchOp::Delete(schema::header_number_key(hash)),
            BatchOp::Delete(schema::body_key(number, hash)),
            BatchOp::Delete(schema::receipts_key(number, hash)),
            BatchOp::Delete(schema::td_key(number, hash)),
        ])
    }

    /// Updates the head header pointer.
    pub fn set_head_header_hash(&self, hash: BlockHash) -> ProviderResult<()> {
        self.db.put(schema::HEAD_HEADER_KEY, hash.as_slice())
    }

    /// Updates the head block pointer.
    pub fn set_head_block_hash(&self, hash: BlockHash) -> ProviderResult<()> {
        self.db.put(schema::HEAD_BLOCK_KEY, hash.as_slice())
    }

    /// The head block pointer, if a head was ever written.
    pub fn head_block_hash(&self) -> ProviderResult<Option<BlockHash>> {
        Ok(self.db.get(schema::HEAD_BLOCK_KEY)?.map(|raw| B256::from_slice(&raw)))
    }

    /// Stores the serialized chain config for compatibility checks at
    /// reopen.
    pub fn set_chain_config(&self, config: &[u8]) -> ProviderResult<()> {
        self.db.put(schema::CHAIN_CONFIG_KEY, config)
    }

    /// The stored chain config blob.
    pub fn chain_config(&self) -> ProviderResult<Option<Vec<u8>>> {
        self.db.get(schema::CHAIN_CONFIG_KEY)
    }

    /// Stores a keccak preimage.
    pub fn set_preimage(&self, hash: B256, preimage: &[u8]) -> ProviderResult<()> {
        self.db.put(&schema::preimage_key(hash), preimage)
    }

    /// Reads a keccak preimage.
    pub fn preimage(&self, hash: B256) -> ProviderResult<Option<Vec<u8>>> {
        self.db.get(&schema::preimage_key(hash))
    }

    /// Stores a bloom-bits section blob for log indexing.
    pub fn set_bloom_bits(&self, bit: u16, section: u64, blob: &[u8]) -> ProviderResult<()> {
        self.db.put(&schema::bloom_bits_key(bit, section), blob)
    }

    /// Reads a bloom-bits section blob.
    pub fn bloom_bits(&self, bit: u16, section: u64) -> ProviderResult<Option<Vec<u8>>> {
        self.db.get(&schema::bloom_bits_key(bit, section))
    }

    /// Resolves a transaction hash to its enclosing block and index.
    pub fn transaction_lookup(&self, hash: B256) -> ProviderResult<Option<(BlockHash, u64)>> {
        match self.db.get(&schema::tx_lookup_key(hash))? {
            Some(raw) => {
                let entry = TxLookupEntry::decode(&mut raw.as_slice())
                    .map_err(|e| ProviderError::Database(e.to_string()))?;
                Ok(Some((entry.block_hash, entry.index)))
            }
            None => Ok(None),
        }
    }

    // === freezer migration ===

    /// Moves every canonical block below `upto` into the cold tier, then
    /// deletes the hot copies. Reads keep succeeding through the cold path.
    pub fn freeze(&self, upto: BlockNumber) -> ProviderResult<()> {
        let Some(freezer) = &self.freezer else { return Ok(()) };
        let mut freezer = freezer.lock();

        let first = freezer.frozen();
        for number in first..upto {
            let hash = self
                .canonical_hash_hot(number)?
                .ok_or(ProviderError::CanonicalHashNotFound(number))?;
            let header = self
                .db
                .get(&schema::header_key(number, hash))?
                .ok_or(ProviderError::HeaderNotFound(number.into()))?;
            let body = self
                .db
                .get(&schema::body_key(number, hash))?
                .ok_or(ProviderError::BodyNotFound(hash))?;
            let receipts = self.db.get(&schema::receipts_key(number, hash))?.unwrap_or_default();
            let td = self
                .db
                .get(&schema::td_key(number, hash))?
                .ok_or(ProviderError::TotalDifficultyNotFound(hash))?;

            freezer.append(number, &header, &body, &receipts, hash.as_slice(), &td)?;

            self.db.write_batch(vec![
                BatchOp::Delete(schema::header_key(number, hash)),
                BatchOp::Delete(schema::body_key(number, hash)),
                BatchOp::Delete(schema::receipts_key(number, hash)),
                BatchOp::Delete(schema::td_key(number, hash)),
                BatchOp::Delete(schema::canonical_key(number)),
            ])?;
        }
        freezer.sync()?;
        if upto > first {
            info!(target: "storage", from = first, upto, "Migrated blocks to the freezer");
        }
        Ok(())
    }

    // === reads with cold fallthrough ===

    fn header_number(&self, hash: B256) -> ProviderResult<Option<BlockNumber>> {
        match self.db.get(&schema::header_number_key(hash))? {
            Some(raw) => Ok(Some(decode_u64(&raw)?)),
            None => Ok(None),
        }
    }

    fn canonical_hash_hot(&self, number: BlockNumber) -> ProviderResult<Option<B256>> {
        Ok(self.db.get(&schema::canonical_key(number))?.map(|raw| B256::from_slice(&raw)))
    }

    fn frozen_blob(
        &self,
        table: FreezerTable,
        number: BlockNumber,
    ) -> ProviderResult<Option<Vec<u8>>> {
        match &self.freezer {
            Some(freezer) => freezer.lock().get(table, number),
            None => Ok(None),
        }
    }

    fn receipts_with_bloom(&self, hash: B256) -> ProviderResult<Option<Vec<ReceiptWithBloom>>> {
        let Some(number) = self.header_number(hash)? else { return Ok(None) };
        let raw = match self.db.get(&schema::receipts_key(number, hash))? {
            Some(raw) => raw,
            None => match self.frozen_blob(FreezerTable::Receipts, number)? {
                Some(raw) => raw,
                None => return Ok(None),
            },
        };
        let receipts = Vec::<ReceiptWithBloom>::decode(&mut raw.as_slice())
            .map_err(|e| ProviderError::Database(e.to_string()))?;
        Ok(Some(receipts))
    }
}

impl<S: KeyValueStore> HeaderProvider for ChainStorage<S> {
    fn header(&self, hash: B256) -> ProviderResult<Option<Header>> {
        let Some(number) = self.header_number(hash)? else { return Ok(None) };
        let raw = match self.db.get(&schema::header_key(number, hash))? {
            Some(raw) => raw,
            None => {
                // only the canonical block of that height is frozen
                match self.frozen_blob(FreezerTable::Headers, number)? {
                    Some(raw) if self.canonical_hash(number)? == Some(hash) => raw,
                    _ => return Ok(None),
                }
            }
        };
        let header = Header::decode(&mut raw.as_slice())
            .map_err(|e| ProviderError::Database(e.to_string()))?;
        Ok(Some(header))
    }

    fn header_by_number(&self, number: BlockNumber) -> ProviderResult<Option<Header>> {
        match self.canonical_hash(number)? {
            Some(hash) => self.header(hash),
            None => Ok(None),
        }
    }

    fn canonical_hash(&self, number: BlockNumber) -> ProviderResult<Option<B256>> {
        if let Some(hash) = self.canonical_hash_hot(number)? {
            return Ok(Some(hash))
        }
        Ok(self.frozen_blob(FreezerTable::Hashes, number)?.map(|raw| B256::from_slice(&raw)))
    }

    fn total_difficulty(&self, hash: B256) -> ProviderResult<Option<U256>> {
        let Some(number) = self.header_number(hash)? else { return Ok(None) };
        let raw = match self.db.get(&schema::td_key(number, hash))? {
            Some(raw) => raw,
            None => match self.frozen_blob(FreezerTable::Diffs, number)? {
                Some(raw) => raw,
                None => return Ok(None),
            },
        };
        let td = U256::decode(&mut raw.as_slice())
            .map_err(|e| ProviderError::Database(e.to_string()))?;
        Ok(Some(td))
    }
}

impl<S: KeyValueStore> BlockProvider for ChainStorage<S> {
    fn block_body(&self, hash: B256) -> ProviderResult<Option<BlockBody>> {
        let Some(number) = self.header_number(hash)? else { return Ok(None) };
        let raw = match self.db.get(&schema::body_key(number, hash))? {
            Some(raw) => raw,
            None => match self.frozen_blob(FreezerTable::Bodies, number)? {
                Some(raw) if self.canonical_hash(number)? == Some(hash) => raw,
                _ => return Ok(None),
            },
        };
        let body = BlockBody::decode(&mut raw.as_slice())
            .map_err(|e| ProviderError::Database(e.to_string()))?;
        Ok(Some(body))
    }

    fn receipts(&self, hash: B256) -> ProviderResult<Option<Vec<Receipt>>> {
        Ok(self
            .receipts_with_bloom(hash)?
            .map(|receipts| receipts.into_iter().map(|r| r.receipt).collect()))
    }

    fn chain_info(&self) -> ProviderResult<ChainInfo> {
        let best_hash = self
            .head_block_hash()?
            .ok_or(ProviderError::HeaderNotFound(BlockNumber::MIN.into()))?;
        let header = self
            .header(best_hash)?
            .ok_or(ProviderError::HeaderNotFound(best_hash.into()))?;
        let total_difficulty = self
            .total_difficulty(best_hash)?
            .ok_or(ProviderError::TotalDifficultyNotFound(best_hash))?;
        Ok(ChainInfo { best_hash, best_number: header.number, total_difficulty })
    }
}

impl<S: KeyValueStore> TrieDb for ChainStorage<S> {
    fn node(&self, hash: B256) -> Option<Vec<u8>> {
        self.db.get(&schema::state_node_key(hash)).ok().flatten()
    }

    fn insert_node(&self, hash: B256, bytes: Vec<u8>) {
        let _ = self.db.put(&schema::state_node_key(hash), &bytes);
    }
}

/// Resolves a transaction hash into `(block hash, index in block)`.
#[derive(Debug, Clone, PartialEq, Eq, alloy_rlp::RlpEncodable, alloy_rlp::RlpDecodable)]
struct TxLookupEntry {
    block_hash: B256,
    index: u64,
}

fn encode<T: Encodable>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode(&mut out);
    out
}

fn decode_u64(raw: &[u8]) -> ProviderResult<u64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| ProviderError::Database("malformed u64 entry".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use rbtp_primitives::SealedHeader;

    fn sealed_block(number: BlockNumber, parent: B256) -> SealedBlock {
        let header = Header { number, parent_hash: parent, ..Default::default() };
        SealedBlock { header: header.seal_slow(), body: vec![], ommers: vec![] }
    }

    fn open_mem() -> ChainStorage<MemoryStore> {
        ChainStorage::open(MemoryStore::new(), None).unwrap()
    }

    #[test]
    fn version_is_stamped_and_checked() {
        let store = MemoryStore::new();
        store.put(schema::VERSION_KEY, &99u64.to_be_bytes()).unwrap();
        assert_eq!(
            ChainStorage::open(store, None).unwrap_err(),
            ProviderError::VersionMismatch { found: 99, expected: schema::DB_VERSION }
        );
    }

    #[test]
    fn block_roundtrip() {
        let storage = open_mem();
        let block = sealed_block(1, B256::repeat_byte(1));
        let hash = block.hash();
        storage.insert_block(&block, U256::from(100), &[]).unwrap();
        storage.set_canonical_hash(1, hash).unwrap();
        storage.set_head_block_hash(hash).unwrap();

        assert_eq!(storage.header(hash).unwrap(), Some(block.header().clone()));
        assert_eq!(storage.header_by_number(1).unwrap(), Some(block.header().clone()));
        assert_eq!(storage.total_difficulty(hash).unwrap(), Some(U256::from(100)));
        assert_eq!(storage.block_body(hash).unwrap(), Some(BlockBody::default()));

        let info = storage.chain_info().unwrap();
        assert_eq!(info.best_hash, hash);
        assert_eq!(info.best_number, 1);
    }

    #[test]
    fn sealed_header_provider_roundtrip() {
        let storage = open_mem();
        let block = sealed_block(5, B256::repeat_byte(3));
        storage.insert_block(&block, U256::from(1), &[]).unwrap();
        let sealed: SealedHeader = storage.sealed_header(block.hash()).unwrap().unwrap();
        assert_eq!(sealed.hash(), block.hash());
    }

    #[test]
    fn freeze_migrates_and_reads_fall_through() {
        let dir = tempfile::tempdir().unwrap();
        let storage =
            ChainStorage::open(MemoryStore::new(), Some(Freezer::open(dir.path()).unwrap()))
                .unwrap();

        let mut parent = B256::ZERO;
        let mut hashes = Vec::new();
        for number in 0..5 {
            let block = sealed_block(number, parent);
            parent = block.hash();
            hashes.push(block.hash());
            storage.insert_block(&block, U256::from(number + 1), &[]).unwrap();
            storage.set_canonical_hash(number, block.hash()).unwrap();
        }

        storage.freeze(3).unwrap();
        assert_eq!(storage.frozen(), 3);

        // hot copies below the boundary are gone
        assert_eq!(storage.db().get(&schema::header_key(0, hashes[0])).unwrap(), None);

        // but every read still succeeds via the cold path
        for (number, hash) in hashes.iter().enumerate() {
            assert_eq!(storage.canonical_hash(number as u64).unwrap(), Some(*hash));
            assert!(storage.header(*hash).unwrap().is_some());
            assert!(storage.block_body(*hash).unwrap().is_some());
            assert_eq!(
                storage.total_difficulty(*hash).unwrap(),
                Some(U256::from(number as u64 + 1))
            );
        }

        // freezing is idempotent over the already-frozen range
        storage.freeze(3).unwrap();
        assert_eq!(storage.frozen(), 3);
    }

    #[test]
    fn tx_lookup_resolves() {
        let storage = open_mem();
        use rbtp_primitives::{sign_message, Transaction, TransactionSigned, B256 as H};
        let tx = {
            let transaction = Transaction { nonce: 0, gas_limit: 21_000, ..Default::default() };
            let sig = sign_message(H::repeat_byte(1), transaction.signature_hash()).unwrap();
            TransactionSigned::from_transaction_and_signature(transaction, sig)
        };
        let header = Header { number: 1, ..Default::default() };
        let block =
            SealedBlock { header: header.seal_slow(), body: vec![tx.clone()], ommers: vec![] };
        storage.insert_block(&block, U256::from(1), &[]).unwrap();

        assert_eq!(
            storage.transaction_lookup(tx.hash()).unwrap(),
            Some((block.hash(), 0))
        );
        assert_eq!(storage.transaction_lookup(B256::repeat_byte(9)).unwrap(), None);
    }

    #[test]
    fn state_nodes_live_in_their_own_table() {
        let storage = open_mem();
        let hash = B256::repeat_byte(0x17);
        storage.insert_node(hash, vec![1, 2, 3]);
        assert_eq!(TrieDb::node(&storage, hash), Some(vec![1, 2, 3]));
        // no bleed into the header namespace
        assert_eq!(storage.header(hash).unwrap(), None);
    }
}
