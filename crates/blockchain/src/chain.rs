use rbtp_chainspec::{ChainSpec, ForkFilter, Hardfork};
use rbtp_db::{ChainStorage, KeyValueStore};
use rbtp_interfaces::{
    consensus::{Consensus, ConsensusError},
    events::{
        ChainHeadEvent, ChainSideEvent, EventSender, EventStream, LogsEvent, RemovedLogsEvent,
    },
    executor::BlockExecutor,
    provider::{
        AccountProvider, BlockImport, BlockProvider, ChainInfo, FastImport, HeaderProvider,
        ImportOutcome, ProviderError, ProviderResult,
    },
    Error,
};
use rbtp_primitives::{
    recover_signers, Account, Address, BlockBody, BlockNumber, Head, Header, Receipt,
    ReceiptWithBloom, SealedBlock, SealedHeader, B256, U256,
};
use rbtp_trie::{StateDb, TrieDb};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};
use tracing::{debug, info, warn};

/// Number of invalid blocks kept for diagnostics.
const BAD_BLOCK_RING: usize = 10;

/// How ties between equal-total-difficulty tips are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Prefer the shorter chain (lower block number); equal heights keep
    /// the first-seen tip.
    #[default]
    ShorterChain,
    /// Always keep the first-seen tip.
    ArrivalOrder,
}

impl TieBreak {
    fn switches(&self, candidate: &SealedHeader, head: &ChainInfo) -> bool {
        match self {
            Self::ShorterChain => candidate.number < head.best_number,
            Self::ArrivalOrder => false,
        }
    }
}

/// A block insert failure, pointing at the offending position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertFailure {
    /// Index of the failing block in the submitted batch.
    pub index: usize,
    /// Why it failed.
    pub error: Error,
}

struct HeadState {
    info: ChainInfo,
    header: SealedHeader,
}

/// The canonical chain manager.
///
/// Owns the storage, drives the consensus engine and the executor, and
/// serializes every state-root-changing operation behind one mutation lock.
/// The lock is never held across network I/O.
pub struct BlockChain<S> {
    pub(crate) storage: Arc<ChainStorage<S>>,
    pub(crate) spec: Arc<ChainSpec>,
    pub(crate) consensus: Arc<dyn Consensus>,
    pub(crate) executor: Arc<dyn BlockExecutor>,
    tie_break: TieBreak,
    /// Serializes canonical mutations.
    mutation: Mutex<()>,
    head: RwLock<HeadState>,
    /// Hashes that failed validation, with the remembered error.
    poisoned: Mutex<HashMap<B256, Error>>,
    /// Ring of recently failed blocks for diagnostics.
    bad_blocks: Mutex<VecDeque<(B256, Error)>>,
    head_events: EventSender<ChainHeadEvent>,
    side_events: EventSender<ChainSideEvent>,
    logs_events: EventSender<LogsEvent>,
    removed_logs_events: EventSender<RemovedLogsEvent>,
}

impl<S> std::fmt::Debug for BlockChain<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let head = self.head.read();
        f.debug_struct("BlockChain")
            .field("head", &head.info.best_hash)
            .field("number", &head.info.best_number)
            .finish_non_exhaustive()
    }
}

impl<S: KeyValueStore + 'static> BlockChain<S> {
    /// Opens the chain over the given storage, bootstrapping the genesis
    /// block into an empty database.
    pub fn new(
        storage: Arc<ChainStorage<S>>,
        spec: Arc<ChainSpec>,
        consensus: Arc<dyn Consensus>,
        executor: Arc<dyn BlockExecutor>,
        tie_break: TieBreak,
    ) -> Result<Self, Error> {
        match storage.head_block_hash()? {
            None => bootstrap_genesis(&storage, &spec)?,
            Some(_) => {
                // the database must belong to this chain
                let stored = storage.canonical_hash(0)?;
                if stored != Some(spec.genesis_hash()) {
                    return Err(ProviderError::Database(format!(
                        "genesis mismatch: database has {stored:?}, chain spec wants {}",
                        spec.genesis_hash()
                    ))
                    .into())
                }
            }
        }

        let info = storage.chain_info()?;
        let header = storage
            .sealed_header(info.best_hash)?
            .ok_or(ProviderError::HeaderNotFound(info.best_hash.into()))?;

        Ok(Self {
            storage,
            spec,
            consensus,
            executor,
            tie_break,
            mutation: Mutex::new(()),
            head: RwLock::new(HeadState { info, header }),
            poisoned: Mutex::new(HashMap::new()),
            bad_blocks: Mutex::new(VecDeque::new()),
            head_events: EventSender::default(),
            side_events: EventSender::default(),
            logs_events: EventSender::default(),
            removed_logs_events: EventSender::default(),
        })
    }

    /// The chain spec this chain validates against.
    pub fn spec(&self) -> &Arc<ChainSpec> {
        &self.spec
    }

    /// The underlying storage provider.
    pub fn storage(&self) -> &Arc<ChainStorage<S>> {
        &self.storage
    }

    /// The current head as a [`Head`] for handshakes and fork filters.
    pub fn head(&self) -> Head {
        let head = self.head.read();
        Head {
            number: head.info.best_number,
            hash: head.info.best_hash,
            difficulty: head.header.difficulty,
            total_difficulty: head.info.total_difficulty,
            timestamp: head.header.timestamp,
        }
    }

    /// A fork filter positioned at the current head.
    pub fn fork_filter(&self) -> ForkFilter {
        self.spec.fork_filter(self.head())
    }

    /// Subscribes to canonical head changes.
    pub fn subscribe_head(&self) -> EventStream<ChainHeadEvent> {
        self.head_events.subscribe()
    }

    /// Subscribes to side-chain and reorg-displaced blocks.
    pub fn subscribe_side(&self) -> EventStream<ChainSideEvent> {
        self.side_events.subscribe()
    }

    /// Subscribes to new canonical logs.
    pub fn subscribe_logs(&self) -> EventStream<LogsEvent> {
        self.logs_events.subscribe()
    }

    /// Subscribes to logs retracted by reorgs.
    pub fn subscribe_removed_logs(&self) -> EventStream<RemovedLogsEvent> {
        self.removed_logs_events.subscribe()
    }

    /// The recently failed blocks with their errors.
    pub fn bad_blocks(&self) -> Vec<(B256, Error)> {
        self.bad_blocks.lock().iter().cloned().collect()
    }

    /// Validates and inserts blocks in order.
    ///
    /// Stops at the first failure; earlier blocks stay committed. Returns
    /// the number of processed blocks on success.
    pub fn insert_chain(&self, blocks: Vec<SealedBlock>) -> Result<usize, InsertFailure> {
        let total = blocks.len();
        for (index, block) in blocks.into_iter().enumerate() {
            if let Err(error) = self.insert_block(block) {
                return Err(InsertFailure { index, error })
            }
        }
        Ok(total)
    }

    /// Validates and inserts one block: header → body → execution → root
    /// comparison → persist → head selection.
    pub fn insert_block(&self, block: SealedBlock) -> Result<ImportOutcome, Error> {
        let _guard = self.mutation.lock();
        let hash = block.hash();

        // failed hashes short-circuit with the remembered error
        if let Some(error) = self.poisoned.lock().get(&hash) {
            return Err(error.clone())
        }
        if self.storage.total_difficulty(hash)?.is_some() {
            return Ok(ImportOutcome::AlreadyKnown)
        }

        let parent = self
            .storage
            .sealed_header(block.parent_hash)?
            .ok_or(ConsensusError::ParentUnknown { hash: block.parent_hash })?;

        match self.validate_and_execute(&block, &parent) {
            Ok(receipts) => self.persist(block, &parent, &receipts),
            Err(error) => {
                // remember consensus and execution failures; a missing
                // parent or storage hiccup is not the block's fault
                if matches!(error, Error::Consensus(_) | Error::Execution(_)) {
                    self.poison(hash, &error);
                }
                Err(error)
            }
        }
    }

    /// Rewinds the canonical chain to `number`, dropping everything newer.
    pub fn set_head(&self, number: BlockNumber) -> Result<(), Error> {
        let _guard = self.mutation.lock();
        let current = self.head.read().info;
        if number >= current.best_number {
            return Ok(())
        }

        for n in (number + 1..=current.best_number).rev() {
            if let Some(hash) = self.storage.canonical_hash(n)? {
                self.storage.delete_block(n, hash)?;
                self.storage.clear_canonical_hash(n)?;
            }
        }

        let hash =
            self.storage.canonical_hash(number)?.ok_or(ProviderError::CanonicalHashNotFound(number))?;
        let header = self
            .storage
            .sealed_header(hash)?
            .ok_or(ProviderError::HeaderNotFound(hash.into()))?;
        let td = self
            .storage
            .total_difficulty(hash)?
            .ok_or(ProviderError::TotalDifficultyNotFound(hash))?;

        self.storage.set_head_header_hash(hash)?;
        self.storage.set_head_block_hash(hash)?;

        let block = Arc::new(self.read_block(&header)?);
        *self.head.write() = HeadState {
            info: ChainInfo { best_hash: hash, best_number: number, total_difficulty: td },
            header,
        };
        info!(target: "blockchain", number, %hash, "Rewound chain head");
        self.head_events.notify(ChainHeadEvent { block });
        Ok(())
    }

    // === import pipeline ===

    fn validate_and_execute(
        &self,
        block: &SealedBlock,
        parent: &SealedHeader,
    ) -> Result<Vec<Receipt>, Error> {
        // Received → HeaderValid
        self.consensus.validate_header(&block.header)?;
        self.consensus.validate_header_against_parent(&block.header, parent)?;
        self.consensus.validate_seal(&block.header)?;

        // HeaderValid → BodyValid
        self.consensus.validate_block(block)?;
        self.validate_ommer_ancestry(block, parent)?;

        // BodyValid → StateValid
        let senders = recover_signers(&block.body)
            .ok_or(ConsensusError::TransactionSignerRecoveryError)?;
        let mut state = StateDb::at(parent.state_root, self.trie_db());
        let output = self.executor.execute(block, &senders, &mut state)?;
        self.consensus.finalize(block.header(), &block.ommers, &mut state)?;

        if output.gas_used != block.gas_used {
            return Err(ConsensusError::BlockGasUsedDiff(
                (output.gas_used, block.gas_used).into(),
            )
            .into())
        }

        let receipts_with_bloom: Vec<_> =
            output.receipts.iter().map(|r| r.clone().with_bloom()).collect();
        let receipts_root = rbtp_trie::root::calculate_receipt_root(&receipts_with_bloom);
        if receipts_root != block.receipts_root {
            return Err(ConsensusError::BodyReceiptsRootDiff(
                (receipts_root, block.receipts_root).into(),
            )
            .into())
        }

        let bloom = receipts_with_bloom
            .iter()
            .fold(rbtp_primitives::Bloom::ZERO, |acc, r| acc | r.bloom);
        if bloom != block.logs_bloom {
            return Err(ConsensusError::BodyBloomDiff.into())
        }

        let prune_empty = self.spec.fork_active(Hardfork::SpuriousDragon, block.number);
        // a commit failure is a local storage problem, not the block's fault
        let state_root = state.commit(prune_empty).map_err(Error::State)?;
        if state_root != block.state_root {
            return Err(
                ConsensusError::BodyStateRootDiff((state_root, block.state_root).into()).into()
            )
        }

        Ok(output.receipts)
    }

    /// Chain-context ommer rules: an ommer must branch off one of the last
    /// seven ancestors and must not itself be an ancestor or an already
    /// included ommer.
    fn validate_ommer_ancestry(
        &self,
        block: &SealedBlock,
        parent: &SealedHeader,
    ) -> Result<(), Error> {
        if block.ommers.is_empty() {
            return Ok(())
        }

        let mut ancestors = HashSet::new();
        let mut included = HashSet::new();
        let mut cursor = parent.clone();
        ancestors.insert(cursor.hash());
        for _ in 0..rbtp_primitives::constants::MAX_OMMER_DEPTH {
            if let Some(body) = self.storage.block_body(cursor.hash())? {
                for ommer in body.ommers {
                    included.insert(ommer.hash_slow());
                }
            }
            if cursor.number == 0 {
                break
            }
            let Some(previous) = self.storage.sealed_header(cursor.parent_hash)? else { break };
            ancestors.insert(previous.hash());
            cursor = previous;
        }

        for ommer in &block.ommers {
            let hash = ommer.hash_slow();
            if ancestors.contains(&hash) || included.contains(&hash) {
                return Err(ConsensusError::DuplicateOmmer { hash }.into())
            }
            if !ancestors.contains(&ommer.parent_hash) {
                return Err(ConsensusError::OmmerTooOld { hash }.into())
            }
        }
        Ok(())
    }

    fn persist(
        &self,
        block: SealedBlock,
        parent: &SealedHeader,
        receipts: &[Receipt],
    ) -> Result<ImportOutcome, Error> {
        let parent_td = self
            .storage
            .total_difficulty(parent.hash())?
            .ok_or(ProviderError::TotalDifficultyNotFound(parent.hash()))?;
        let td = parent_td + block.difficulty;

        let receipts_with_bloom: Vec<_> =
            receipts.iter().map(|r| r.clone().with_bloom()).collect();
        self.storage.insert_block(&block, td, &receipts_with_bloom)?;
        metrics::counter!("blockchain.inserted_blocks").increment(1);

        // StateValid → Committed; decide where the block lands
        let head = self.head.read().info;
        let extends_head = head.total_difficulty < td ||
            (head.total_difficulty == td && self.tie_break.switches(&block.header, &head));

        if extends_head {
            self.make_canonical(block, td)
        } else {
            debug!(target: "blockchain", hash = %block.hash(), number = block.number, "Stored side block");
            self.side_events.notify(ChainSideEvent { block: Arc::new(block) });
            Ok(ImportOutcome::Side)
        }
    }

    /// Makes `tip` the canonical head, reorganizing the index if the new
    /// branch forks below the current head.
    fn make_canonical(&self, tip: SealedBlock, td: U256) -> Result<ImportOutcome, Error> {
        let old_head = self.head.read().info;

        // walk the new branch down to the first block that is already
        // canonical
        let mut new_branch: Vec<SealedBlock> = Vec::new();
        let tip_header = tip.header.clone();
        new_branch.push(tip);
        loop {
            let last = new_branch.last().expect("non-empty");
            if last.number == 0 {
                break
            }
            let parent = self
                .storage
                .sealed_header(last.parent_hash)?
                .ok_or(ConsensusError::ParentUnknown { hash: last.parent_hash })?;
            if self.storage.canonical_hash(parent.number)? == Some(parent.hash()) {
                break
            }
            new_branch.push(self.read_block(&parent)?);
        }
        let ancestor_number = new_branch.last().expect("non-empty").number.saturating_sub(1);

        // retract the old canonical blocks above the fork point
        let mut retracted = Vec::new();
        for number in ancestor_number + 1..=old_head.best_number {
            if let Some(hash) = self.storage.canonical_hash(number)? {
                if let Some(header) = self.storage.sealed_header(hash)? {
                    retracted.push(self.read_block(&header)?);
                }
                self.storage.clear_canonical_hash(number)?;
            }
        }

        // rewrite the canonical index for the new branch
        for block in new_branch.iter().rev() {
            self.storage.set_canonical_hash(block.number, block.hash())?;
        }
        self.storage.set_head_header_hash(tip_header.hash())?;
        self.storage.set_head_block_hash(tip_header.hash())?;

        let reorged = !retracted.is_empty() || new_branch.len() > 1;
        if reorged {
            metrics::counter!("blockchain.reorgs").increment(1);
            info!(
                target: "blockchain",
                from = %old_head.best_hash,
                to = %tip_header.hash(),
                depth = new_branch.len(),
                retracted = retracted.len(),
                "Chain reorganization"
            );
        }

        // retracted logs surface before the new head does
        for block in retracted {
            if let Some(receipts) = self.storage.receipts(block.hash())? {
                let logs: Vec<_> =
                    receipts.into_iter().flat_map(|receipt| receipt.logs).collect();
                if !logs.is_empty() {
                    self.removed_logs_events.notify(RemovedLogsEvent { logs });
                }
            }
            self.side_events.notify(ChainSideEvent { block: Arc::new(block) });
        }

        // logs of every newly canonical block, in ascending order
        let mut logs = Vec::new();
        for block in new_branch.iter().rev() {
            if let Some(receipts) = self.storage.receipts(block.hash())? {
                logs.extend(receipts.into_iter().flat_map(|receipt| receipt.logs));
            }
        }

        let head_block = Arc::new(new_branch.swap_remove(0));
        *self.head.write() = HeadState {
            info: ChainInfo {
                best_hash: tip_header.hash(),
                best_number: tip_header.number,
                total_difficulty: td,
            },
            header: tip_header,
        };

        if !logs.is_empty() {
            self.logs_events.notify(LogsEvent { logs });
        }
        self.head_events.notify(ChainHeadEvent { block: head_block });
        Ok(ImportOutcome::Canonical)
    }

    fn poison(&self, hash: B256, error: &Error) {
        warn!(target: "blockchain", %hash, %error, "Rejected invalid block");
        metrics::counter!("blockchain.invalid_blocks").increment(1);
        self.poisoned.lock().insert(hash, error.clone());
        let mut ring = self.bad_blocks.lock();
        ring.push_back((hash, error.clone()));
        while ring.len() > BAD_BLOCK_RING {
            ring.pop_front();
        }
    }

    fn read_block(&self, header: &SealedHeader) -> Result<SealedBlock, Error> {
        let body = self
            .storage
            .block_body(header.hash())?
            .ok_or(ProviderError::BodyNotFound(header.hash()))?;
        Ok(SealedBlock {
            header: header.clone(),
            body: body.transactions,
            ommers: body.ommers,
        })
    }

    pub(crate) fn trie_db(&self) -> Arc<dyn TrieDb> {
        Arc::clone(&self.storage) as Arc<dyn TrieDb>
    }

    /// A state view at the given root.
    pub fn state_at(&self, root: B256) -> StateDb {
        StateDb::at(root, self.trie_db())
    }

    /// A state view at the current head.
    pub fn state_at_head(&self) -> StateDb {
        self.state_at(self.head.read().header.state_root)
    }
}

fn bootstrap_genesis<S: KeyValueStore + 'static>(
    storage: &Arc<ChainStorage<S>>,
    spec: &ChainSpec,
) -> Result<(), Error> {
    let trie_db: Arc<dyn TrieDb> = Arc::clone(storage) as Arc<dyn TrieDb>;
    let mut state = StateDb::at(rbtp_primitives::EMPTY_ROOT_HASH, trie_db);
    for (address, account) in &spec.genesis.alloc {
        state.add_balance(*address, account.balance).map_err(ConsensusError::from)?;
        if let Some(nonce) = account.nonce {
            state.set_nonce(*address, nonce).map_err(ConsensusError::from)?;
        }
        if let Some(code) = &account.code {
            state.set_code(*address, code.clone()).map_err(ConsensusError::from)?;
        }
        if let Some(slots) = &account.storage {
            for (key, value) in slots {
                state
                    .set_storage(*address, *key, U256::from_be_bytes(value.0))
                    .map_err(ConsensusError::from)?;
            }
        }
    }
    let root = state.commit(false).map_err(ConsensusError::from)?;

    let header = spec.genesis_header().clone();
    if root != header.state_root {
        return Err(ProviderError::Database(format!(
            "genesis allocation root {root} does not match header root {}",
            header.state_root
        ))
        .into())
    }

    let block = SealedBlock {
        header: header.seal_slow(),
        body: Vec::new(),
        ommers: Vec::new(),
    };
    let hash = block.hash();
    storage.insert_block(&block, block.difficulty, &[])?;
    storage.set_canonical_hash(0, hash)?;
    storage.set_head_header_hash(hash)?;
    storage.set_head_block_hash(hash)?;
    info!(target: "blockchain", %hash, "Wrote genesis block");
    Ok(())
}

impl<S: KeyValueStore + 'static> HeaderProvider for BlockChain<S> {
    fn header(&self, hash: B256) -> ProviderResult<Option<Header>> {
        self.storage.header(hash)
    }

    fn header_by_number(&self, number: BlockNumber) -> ProviderResult<Option<Header>> {
        self.storage.header_by_number(number)
    }

    fn canonical_hash(&self, number: BlockNumber) -> ProviderResult<Option<B256>> {
        self.storage.canonical_hash(number)
    }

    fn total_difficulty(&self, hash: B256) -> ProviderResult<Option<U256>> {
        self.storage.total_difficulty(hash)
    }
}

impl<S: KeyValueStore + 'static> BlockProvider for BlockChain<S> {
    fn block_body(&self, hash: B256) -> ProviderResult<Option<BlockBody>> {
        self.storage.block_body(hash)
    }

    fn receipts(&self, hash: B256) -> ProviderResult<Option<Vec<Receipt>>> {
        self.storage.receipts(hash)
    }

    fn chain_info(&self) -> ProviderResult<ChainInfo> {
        Ok(self.head.read().info)
    }
}

impl<S: KeyValueStore + 'static> AccountProvider for BlockChain<S> {
    fn basic_account(&self, address: Address) -> ProviderResult<Option<Account>> {
        let mut state = self.state_at_head();
        state.account(address).map_err(|e| ProviderError::Database(e.to_string()))
    }
}

impl<S: KeyValueStore + 'static> BlockImport for BlockChain<S> {
    fn insert_block(&self, block: SealedBlock) -> Result<ImportOutcome, Error> {
        BlockChain::insert_block(self, block)
    }
}

impl<S: KeyValueStore + 'static> FastImport for BlockChain<S> {
    fn insert_headers(&self, headers: &[SealedHeader]) -> Result<(), Error> {
        let _guard = self.mutation.lock();
        for header in headers {
            let parent_td = self
                .storage
                .total_difficulty(header.parent_hash)?
                .ok_or(ConsensusError::ParentUnknown { hash: header.parent_hash })?;
            let td = parent_td + header.difficulty;
            self.storage.insert_header(header.header(), header.hash(), td)?;
            self.storage.set_canonical_hash(header.number, header.hash())?;
            self.storage.set_head_header_hash(header.hash())?;
        }
        Ok(())
    }

    fn insert_block_without_execution(
        &self,
        block: SealedBlock,
        receipts: Vec<ReceiptWithBloom>,
    ) -> Result<(), Error> {
        let _guard = self.mutation.lock();

        // commitments still hold, only execution is skipped
        self.consensus.validate_block(&block)?;
        let receipts_root = rbtp_trie::root::calculate_receipt_root(&receipts);
        if receipts_root != block.receipts_root {
            return Err(ConsensusError::BodyReceiptsRootDiff(
                (receipts_root, block.receipts_root).into(),
            )
            .into())
        }

        let parent_td = self
            .storage
            .total_difficulty(block.parent_hash)?
            .ok_or(ConsensusError::ParentUnknown { hash: block.parent_hash })?;
        let td = parent_td + block.difficulty;
        self.storage.insert_block(&block, td, &receipts)?;
        self.storage.set_canonical_hash(block.number, block.hash())?;
        self.storage.set_head_header_hash(block.hash())?;
        Ok(())
    }

    fn commit_fast_sync_head(&self, hash: B256) -> Result<(), Error> {
        let _guard = self.mutation.lock();
        let header = self
            .storage
            .sealed_header(hash)?
            .ok_or(ProviderError::HeaderNotFound(hash.into()))?;
        let td = self
            .storage
            .total_difficulty(hash)?
            .ok_or(ProviderError::TotalDifficultyNotFound(hash))?;

        // the pivot state must have fully arrived
        if !self.trie_db().contains_node(header.state_root) {
            return Err(ProviderError::Database(format!(
                "fast sync state root {} not present",
                header.state_root
            ))
            .into())
        }

        self.storage.set_head_header_hash(hash)?;
        self.storage.set_head_block_hash(hash)?;
        let block = Arc::new(self.read_block(&header)?);
        *self.head.write() = HeadState {
            info: ChainInfo {
                best_hash: hash,
                best_number: header.number,
                total_difficulty: td,
            },
            header,
        };
        info!(target: "blockchain", %hash, "Committed fast sync head");
        self.head_events.notify(ChainHeadEvent { block });
        Ok(())
    }
}
