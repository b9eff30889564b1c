use crate::{
    config::PoolConfig,
    error::{PoolError, PoolResult},
    journal::Journal,
    list::{PoolTransaction, TxList},
};
use rbtp_chainspec::ChainSpec;
use rbtp_interfaces::{
    events::{EventSender, EventStream, NewTxsEvent},
    provider::{AccountProvider, BlockProvider},
};
use rbtp_primitives::{Account, Address, SealedHeader, TransactionSigned, TxHash};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Instant,
};
use tracing::{debug, trace, warn};

/// Hard cap on call data size accepted into the pool.
const MAX_DATA_SIZE: usize = 128 * 1024;

/// Counts of the two sub-pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Executable transactions.
    pub pending: usize,
    /// Gapped or otherwise non-executable transactions.
    pub queued: usize,
}

/// The transaction pool.
///
/// Two disjoint sets per sender: `pending` holds contiguous nonces starting
/// at the on-chain account nonce, `queued` holds the rest. All mutation
/// happens under one lock; reads hand out copied snapshots.
pub struct TxPool {
    config: PoolConfig,
    spec: Arc<ChainSpec>,
    provider: Arc<dyn AccountProvider>,
    inner: Mutex<PoolInner>,
    events: EventSender<NewTxsEvent>,
}

impl std::fmt::Debug for TxPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("TxPool")
            .field("pending", &status.pending)
            .field("queued", &status.queued)
            .finish_non_exhaustive()
    }
}

struct PoolInner {
    all: HashMap<TxHash, Arc<PoolTransaction>>,
    pending: HashMap<Address, TxList>,
    queued: HashMap<Address, TxList>,
    /// Senders whose transactions are pinned through the journal.
    locals: HashSet<Address>,
    journal: Option<Journal>,
    price_limit: u128,
    block_gas_limit: u64,
    /// The head the pool is currently rebased on.
    head: SealedHeader,
}

impl TxPool {
    /// Creates the pool rebased on `head`, replaying the journal if one is
    /// configured.
    pub fn new(
        config: PoolConfig,
        spec: Arc<ChainSpec>,
        provider: Arc<dyn AccountProvider>,
        head: SealedHeader,
    ) -> Self {
        let locals: HashSet<Address> = config.locals.iter().copied().collect();
        let journal = config.journal.clone().map(Journal::new);
        let block_gas_limit = head.gas_limit;
        let pool = Self {
            inner: Mutex::new(PoolInner {
                all: HashMap::new(),
                pending: HashMap::new(),
                queued: HashMap::new(),
                locals,
                journal,
                price_limit: config.price_limit,
                block_gas_limit,
                head,
            }),
            config,
            spec,
            provider,
            events: EventSender::default(),
        };

        let mut journaled = Vec::new();
        if let Some(journal) = &pool.inner.lock().journal {
            if let Err(err) = journal.load(|tx| journaled.push(tx)) {
                warn!(target: "txpool", path = %journal.path().display(), %err, "Failed to replay journal");
            }
        }
        for tx in journaled {
            let _ = pool.add_transaction(tx, true);
        }
        pool
    }

    /// Subscribes to admissions and promotions.
    pub fn subscribe(&self) -> EventStream<NewTxsEvent> {
        self.events.subscribe()
    }

    /// Counts of the two sub-pools.
    pub fn status(&self) -> PoolStatus {
        let inner = self.inner.lock();
        PoolStatus {
            pending: inner.pending.values().map(TxList::len).sum(),
            queued: inner.queued.values().map(TxList::len).sum(),
        }
    }

    /// Whether the pool holds the transaction.
    pub fn contains(&self, hash: &TxHash) -> bool {
        self.inner.lock().all.contains_key(hash)
    }

    /// The pooled transaction for `hash`.
    pub fn get(&self, hash: &TxHash) -> Option<Arc<PoolTransaction>> {
        self.inner.lock().all.get(hash).cloned()
    }

    /// Consistent copy of all executable transactions, nonce ordered per
    /// sender.
    pub fn pending(&self) -> HashMap<Address, Vec<Arc<PoolTransaction>>> {
        let inner = self.inner.lock();
        inner
            .pending
            .iter()
            .map(|(sender, list)| (*sender, list.iter().cloned().collect()))
            .collect()
    }

    /// Executable transactions flattened for block building: price
    /// descending across senders, nonce ascending within one.
    pub fn best_transactions(&self) -> Vec<Arc<PoolTransaction>> {
        let mut per_sender: Vec<Vec<Arc<PoolTransaction>>> = {
            let inner = self.inner.lock();
            inner.pending.values().map(|list| list.iter().cloned().collect()).collect()
        };

        let mut best = Vec::new();
        loop {
            let head = per_sender
                .iter()
                .enumerate()
                .filter_map(|(i, txs)| txs.first().map(|tx| (i, tx.gas_price())))
                .max_by_key(|(_, price)| *price);
            match head {
                Some((index, _)) => best.push(per_sender[index].remove(0)),
                None => break,
            }
            per_sender.retain(|txs| !txs.is_empty());
        }
        best
    }

    /// The next executable nonce the pool would accept from `sender`.
    pub fn next_nonce(&self, sender: Address) -> u64 {
        let inner = self.inner.lock();
        if let Some(list) = inner.pending.get(&sender) {
            if let Some(last) = list.last_nonce() {
                return last + 1
            }
        }
        self.account(sender).nonce
    }

    /// Raises (or lowers) the price floor, dropping every non-local
    /// transaction below it.
    pub fn set_gas_price(&self, price: u128) {
        let mut dropped = Vec::new();
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            inner.price_limit = price;

            let senders: Vec<Address> =
                inner.pending.keys().chain(inner.queued.keys()).copied().collect();
            for sender in senders {
                if inner.locals.contains(&sender) {
                    continue
                }
                if let Some(list) = inner.queued.get_mut(&sender) {
                    let (below, gapped) = list.filter(|tx| tx.gas_price() >= price);
                    dropped.extend(below);
                    dropped.extend(gapped);
                    if list.is_empty() {
                        inner.queued.remove(&sender);
                    }
                }
                if let Some(list) = inner.pending.get_mut(&sender) {
                    let (below, gapped) = list.filter(|tx| tx.gas_price() >= price);
                    dropped.extend(below);
                    if list.is_empty() {
                        inner.pending.remove(&sender);
                    }
                    // survivors above a dropped nonce are no longer
                    // executable, park them
                    for tx in gapped {
                        inner.queued.entry(sender).or_default().insert(tx);
                    }
                }
            }
            for tx in &dropped {
                inner.all.remove(&tx.transaction.hash());
            }
        }
        debug!(target: "txpool", price, dropped = dropped.len(), "Repriced transaction pool");
        metrics::counter!("txpool.repriced_drops").increment(dropped.len() as u64);
    }

    /// Validates and admits one transaction.
    pub fn add_transaction(&self, tx: TransactionSigned, local: bool) -> PoolResult<TxHash> {
        self.add_inner(tx, local, false)
    }

    /// Validates and admits a batch, reporting per-transaction outcomes.
    pub fn add_transactions(
        &self,
        txs: Vec<TransactionSigned>,
        local: bool,
    ) -> Vec<PoolResult<TxHash>> {
        txs.into_iter().map(|tx| self.add_transaction(tx, local)).collect()
    }

    fn account(&self, sender: Address) -> Account {
        self.provider.basic_account(sender).ok().flatten().unwrap_or_default()
    }

    fn add_inner(
        &self,
        tx: TransactionSigned,
        local: bool,
        reinjected: bool,
    ) -> PoolResult<TxHash> {
        let hash = tx.hash();

        if tx.input.len() > MAX_DATA_SIZE {
            return Err(PoolError::OversizedData)
        }
        if let Some(chain_id) = tx.chain_id {
            if chain_id != self.spec.chain_id {
                return Err(PoolError::ChainIdMismatch {
                    got: chain_id,
                    expected: self.spec.chain_id,
                })
            }
        }
        let recovered =
            Arc::new(tx.into_ecrecovered().ok_or(PoolError::InvalidSender)?);
        let sender = recovered.signer();
        let account = self.account(sender);

        let mut promoted = Vec::new();
        {
            let mut inner = self.inner.lock();

            if inner.all.contains_key(&hash) {
                return Err(PoolError::AlreadyKnown(hash))
            }
            if recovered.gas_limit > inner.block_gas_limit {
                return Err(PoolError::GasLimitExceeded)
            }

            let local = local || inner.is_local(&sender);
            if !local && !reinjected && recovered.gas_price < inner.price_limit {
                return Err(PoolError::Underpriced)
            }
            if recovered.nonce < account.nonce {
                return Err(PoolError::NonceTooLow {
                    account_nonce: account.nonce,
                    tx_nonce: recovered.nonce,
                })
            }
            if recovered.intrinsic_gas() > recovered.gas_limit {
                return Err(PoolError::IntrinsicGasTooLow)
            }
            let cost = recovered.cost();
            if account.balance < cost {
                return Err(PoolError::InsufficientFunds { balance: account.balance, cost })
            }

            let entry = Arc::new(PoolTransaction {
                transaction: Arc::clone(&recovered),
                added: Instant::now(),
                local,
            });

            // a nonce collision is only accepted as a sufficient price bump
            if let Some(old) = inner
                .pending
                .get(&sender)
                .and_then(|list| list.get(recovered.nonce))
                .cloned()
            {
                inner.check_bump(&old, &entry, self.config.price_bump)?;
                inner.all.remove(&old.transaction.hash());
                inner.all.insert(hash, Arc::clone(&entry));
                inner.pending.get_mut(&sender).expect("checked").insert(Arc::clone(&entry));
                promoted.push(Arc::clone(&recovered));
                inner.journal_local(&entry);
                trace!(target: "txpool", %hash, "Replaced executable transaction");
            } else if let Some(old) = inner
                .queued
                .get(&sender)
                .and_then(|list| list.get(recovered.nonce))
                .cloned()
            {
                inner.check_bump(&old, &entry, self.config.price_bump)?;
                inner.all.remove(&old.transaction.hash());
                inner.all.insert(hash, Arc::clone(&entry));
                inner.queued.get_mut(&sender).expect("checked").insert(Arc::clone(&entry));
                inner.journal_local(&entry);
                trace!(target: "txpool", %hash, "Replaced queued transaction");
            } else {
                // admission against capacity
                if inner.all.len() >= self.config.global_slots + self.config.global_queue {
                    if !local && !inner.evict_cheaper_than(&entry) {
                        return Err(PoolError::PoolOverflow)
                    }
                }

                let next_pending = inner.next_pending_nonce(&sender, account.nonce);
                inner.all.insert(hash, Arc::clone(&entry));
                if recovered.nonce == next_pending {
                    inner.pending.entry(sender).or_default().insert(Arc::clone(&entry));
                    promoted.push(Arc::clone(&recovered));
                    promoted.extend(inner.promote(sender, account.nonce));
                } else {
                    inner.queued.entry(sender).or_default().insert(Arc::clone(&entry));
                    let over_cap = inner
                        .queued
                        .get_mut(&sender)
                        .expect("created")
                        .cap(self.config.account_queue);
                    for dropped in over_cap {
                        inner.all.remove(&dropped.transaction.hash());
                    }
                }
                inner.journal_local(&entry);
            }

            if local {
                inner.locals.insert(sender);
            }
            inner.enforce_pending_cap(&self.config);
            inner.enforce_queue_cap(&self.config);
            // the transaction itself may have been a victim of the caps
            if !inner.all.contains_key(&hash) {
                return Err(PoolError::PoolOverflow)
            }
        }

        metrics::counter!("txpool.admitted").increment(1);
        if !promoted.is_empty() {
            self.events.notify(NewTxsEvent { transactions: promoted });
        }
        Ok(hash)
    }

    /// Rebases the pool on a new canonical head: re-admits transactions
    /// retracted by a reorg, drops mined ones, demotes newly invalid
    /// pending and promotes newly executable queued transactions.
    pub fn on_new_head(&self, provider: &dyn BlockProvider, new_head: SealedHeader) {
        let reinject = {
            let inner = self.inner.lock();
            crate::maintain::find_reinjectable(provider, &inner.head, &new_head)
        };

        for tx in reinject {
            // retracted transactions skip the price floor on their way back
            let hash = tx.hash();
            if let Err(err) = self.add_inner(tx, false, true) {
                trace!(target: "txpool", %hash, %err, "Dropped retracted transaction");
            }
        }

        let mut promoted = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.block_gas_limit = new_head.gas_limit;
            inner.head = new_head;

            let senders: Vec<Address> =
                inner.pending.keys().chain(inner.queued.keys()).copied().collect();
            for sender in senders {
                let account = self.account(sender);
                inner.demote(sender, &account);
                promoted.extend(inner.promote(sender, account.nonce));
            }
            inner.evict_stale(self.config.lifetime);
            inner.rotate_journal();
        }

        if !promoted.is_empty() {
            self.events.notify(NewTxsEvent { transactions: promoted });
        }
    }
}

impl PoolInner {
    fn is_local(&self, sender: &Address) -> bool {
        self.locals.contains(sender)
    }

    fn check_bump(
        &self,
        old: &PoolTransaction,
        new: &PoolTransaction,
        bump: u128,
    ) -> PoolResult<()> {
        let threshold = old.gas_price() + old.gas_price() * bump / 100;
        if new.gas_price() < threshold {
            return Err(PoolError::ReplacementUnderpriced)
        }
        Ok(())
    }

    /// The nonce the next pending insertion must carry.
    fn next_pending_nonce(&self, sender: &Address, account_nonce: u64) -> u64 {
        self.pending
            .get(sender)
            .and_then(TxList::last_nonce)
            .map(|last| last + 1)
            .unwrap_or(account_nonce)
    }

    /// Moves newly contiguous queued transactions into pending.
    fn promote(
        &mut self,
        sender: Address,
        account_nonce: u64,
    ) -> Vec<Arc<rbtp_primitives::TransactionSignedEcRecovered>> {
        let start = self.next_pending_nonce(&sender, account_nonce);
        let Some(queue) = self.queued.get_mut(&sender) else { return Vec::new() };
        let ready = queue.ready(start);
        if queue.is_empty() {
            self.queued.remove(&sender);
        }
        let mut promoted = Vec::with_capacity(ready.len());
        for tx in ready {
            promoted.push(Arc::clone(&tx.transaction));
            self.pending.entry(sender).or_default().insert(tx);
        }
        promoted
    }

    /// Drops mined and invalid pending transactions, parking gapped tails
    /// back in the queue.
    fn demote(&mut self, sender: Address, account: &Account) {
        // queued entries below the account nonce are mined or stale
        if let Some(queue) = self.queued.get_mut(&sender) {
            for dropped in queue.forward(account.nonce) {
                self.all.remove(&dropped.transaction.hash());
            }
            if queue.is_empty() {
                self.queued.remove(&sender);
            }
        }

        let Some(list) = self.pending.get_mut(&sender) else { return };
        for mined in list.forward(account.nonce) {
            self.all.remove(&mined.transaction.hash());
        }

        let mut balance = account.balance;
        let (dropped, gapped) = list.filter(|tx| {
            let cost = tx.cost();
            if cost <= balance {
                balance -= cost;
                true
            } else {
                false
            }
        });
        for tx in dropped {
            self.all.remove(&tx.transaction.hash());
        }
        for tx in gapped {
            self.queued.entry(sender).or_default().insert(tx);
        }
        if list.is_empty() {
            self.pending.remove(&sender);
        }
    }

    /// Evicts one pooled non-local transaction cheaper than `entry` to make
    /// room; `false` when nothing cheaper exists.
    fn evict_cheaper_than(&mut self, entry: &PoolTransaction) -> bool {
        let victim = self
            .all
            .values()
            .filter(|tx| !tx.local && tx.gas_price() < entry.gas_price())
            .min_by_key(|tx| tx.gas_price())
            .cloned();
        match victim {
            Some(victim) => {
                self.remove_with_descendants(&victim);
                metrics::counter!("txpool.evicted").increment(1);
                true
            }
            None => false,
        }
    }

    /// Keeps total pending within `global_slots` by shedding tail
    /// transactions of the lowest-priced offenders; ties go against the
    /// account with the largest surplus over its guaranteed slots.
    fn enforce_pending_cap(&mut self, config: &PoolConfig) {
        loop {
            let total: usize = self.pending.values().map(TxList::len).sum();
            if total <= config.global_slots {
                return
            }

            let victim = self
                .pending
                .iter()
                .filter(|(sender, list)| {
                    !self.locals.contains(*sender) && list.len() > config.account_slots
                })
                .filter_map(|(sender, list)| {
                    let tail = list.last_nonce().and_then(|nonce| list.get(nonce))?;
                    Some((*sender, tail.gas_price(), list.len()))
                })
                .min_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)))
                .map(|(sender, _, _)| sender);

            // every remaining offender is local or within its guarantee
            let Some(sender) = victim else { return };
            let list = self.pending.get_mut(&sender).expect("selected above");
            if let Some(nonce) = list.last_nonce() {
                if let Some(tx) = list.remove(nonce) {
                    self.all.remove(&tx.transaction.hash());
                }
            }
            if list.is_empty() {
                self.pending.remove(&sender);
            }
        }
    }

    /// Keeps total queued within `global_queue` by dropping the oldest
    /// non-local entries.
    fn enforce_queue_cap(&mut self, config: &PoolConfig) {
        loop {
            let total: usize = self.queued.values().map(TxList::len).sum();
            if total <= config.global_queue {
                return
            }
            let victim = self
                .queued
                .iter()
                .filter(|(sender, _)| !self.locals.contains(*sender))
                .filter_map(|(sender, list)| {
                    let nonce = list.last_nonce()?;
                    let tx = list.get(nonce)?;
                    Some((*sender, nonce, tx.added))
                })
                .min_by_key(|(_, _, added)| *added);
            let Some((sender, nonce, _)) = victim else { return };
            if let Some(list) = self.queued.get_mut(&sender) {
                if let Some(tx) = list.remove(nonce) {
                    self.all.remove(&tx.transaction.hash());
                }
                if list.is_empty() {
                    self.queued.remove(&sender);
                }
            }
        }
    }

    /// Drops queued non-local transactions that idled past their lifetime.
    fn evict_stale(&mut self, lifetime: std::time::Duration) {
        let senders: Vec<Address> = self.queued.keys().copied().collect();
        for sender in senders {
            if self.is_local(&sender) {
                continue
            }
            if let Some(list) = self.queued.get_mut(&sender) {
                let (stale, gapped) = list.filter(|tx| tx.added.elapsed() < lifetime);
                for tx in stale.into_iter().chain(gapped) {
                    self.all.remove(&tx.transaction.hash());
                    metrics::counter!("txpool.lifetime_evictions").increment(1);
                }
                if list.is_empty() {
                    self.queued.remove(&sender);
                }
            }
        }
    }

    /// Removes a transaction and every higher-nonce transaction of the same
    /// sender that would be left gapped in pending.
    fn remove_with_descendants(&mut self, tx: &PoolTransaction) {
        let sender = tx.transaction.signer();
        let nonce = tx.nonce();
        self.all.remove(&tx.transaction.hash());

        if let Some(list) = self.queued.get_mut(&sender) {
            list.remove(nonce);
            if list.is_empty() {
                self.queued.remove(&sender);
            }
        }

        let Some(mut list) = self.pending.remove(&sender) else { return };
        if list.remove(nonce).is_none() {
            self.pending.insert(sender, list);
            return
        }
        // higher-nonce transactions lose their executability, park them
        for descendant in list.forward(u64::MAX) {
            if descendant.nonce() > nonce {
                self.queued.entry(sender).or_default().insert(descendant);
            } else {
                self.pending.entry(sender).or_default().insert(descendant);
            }
        }
    }

    fn journal_local(&mut self, entry: &PoolTransaction) {
        if !entry.local {
            return
        }
        if let Some(journal) = &mut self.journal {
            if let Err(err) = journal.insert(&entry.transaction) {
                warn!(target: "txpool", %err, "Failed to journal local transaction");
            }
        }
    }

    fn rotate_journal(&mut self) {
        let Some(journal) = &mut self.journal else { return };
        let keep: Vec<_> = self
            .all
            .values()
            .filter(|tx| tx.local)
            .map(|tx| (*tx.transaction).clone().into_signed())
            .collect();
        if let Err(err) = journal.rotate(keep.iter()) {
            warn!(target: "txpool", %err, "Failed to rotate journal");
        }
    }
}
