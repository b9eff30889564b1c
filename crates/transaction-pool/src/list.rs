use rbtp_primitives::{TransactionSignedEcRecovered, U256};
use std::{collections::BTreeMap, sync::Arc, time::Instant};

/// A pool entry: the recovered transaction plus admission metadata.
#[derive(Debug, Clone)]
pub struct PoolTransaction {
    /// The recovered transaction.
    pub transaction: Arc<TransactionSignedEcRecovered>,
    /// When the transaction entered the pool.
    pub added: Instant,
    /// Whether the transaction is exempt from price-based eviction.
    pub local: bool,
}

impl PoolTransaction {
    /// The offered gas price.
    pub fn gas_price(&self) -> u128 {
        self.transaction.gas_price
    }

    /// The sender nonce.
    pub fn nonce(&self) -> u64 {
        self.transaction.nonce
    }

    /// Maximum wei this transaction can cost its sender.
    pub fn cost(&self) -> U256 {
        self.transaction.cost()
    }
}

/// A per-sender list of transactions ordered by nonce.
#[derive(Debug, Default)]
pub(crate) struct TxList {
    items: BTreeMap<u64, Arc<PoolTransaction>>,
}

impl TxList {
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn get(&self, nonce: u64) -> Option<&Arc<PoolTransaction>> {
        self.items.get(&nonce)
    }

    pub(crate) fn insert(&mut self, tx: Arc<PoolTransaction>) -> Option<Arc<PoolTransaction>> {
        self.items.insert(tx.nonce(), tx)
    }

    pub(crate) fn remove(&mut self, nonce: u64) -> Option<Arc<PoolTransaction>> {
        self.items.remove(&nonce)
    }

    /// Nonce-ascending iteration.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<PoolTransaction>> {
        self.items.values()
    }

    /// The lowest nonce present.
    pub(crate) fn first_nonce(&self) -> Option<u64> {
        self.items.keys().next().copied()
    }

    /// The highest nonce present.
    pub(crate) fn last_nonce(&self) -> Option<u64> {
        self.items.keys().next_back().copied()
    }

    /// Removes and returns every transaction with a nonce below `nonce`.
    pub(crate) fn forward(&mut self, nonce: u64) -> Vec<Arc<PoolTransaction>> {
        let keep = self.items.split_off(&nonce);
        std::mem::replace(&mut self.items, keep).into_values().collect()
    }

    /// Removes and returns transactions that fail `keep`, plus everything
    /// nonce-above the first failure (their gap makes them unexecutable).
    pub(crate) fn filter(
        &mut self,
        mut keep: impl FnMut(&PoolTransaction) -> bool,
    ) -> (Vec<Arc<PoolTransaction>>, Vec<Arc<PoolTransaction>>) {
        let mut dropped = Vec::new();
        let first_failure =
            self.items.iter().find(|(_, tx)| !keep(tx)).map(|(nonce, _)| *nonce);
        let Some(failure) = first_failure else { return (dropped, Vec::new()) };

        let mut tail = self.items.split_off(&failure);
        // the failing transaction itself is dropped, the rest become gapped
        if let Some(tx) = tail.remove(&failure) {
            dropped.push(tx);
        }
        let gapped = tail.into_values().collect();
        (dropped, gapped)
    }

    /// Removes and returns the contiguous run starting at `start`.
    pub(crate) fn ready(&mut self, start: u64) -> Vec<Arc<PoolTransaction>> {
        let mut ready = Vec::new();
        let mut next = start;
        while let Some(tx) = self.items.remove(&next) {
            ready.push(tx);
            next += 1;
        }
        ready
    }

    /// Drops the highest-nonce transactions down to `max` entries.
    pub(crate) fn cap(&mut self, max: usize) -> Vec<Arc<PoolTransaction>> {
        let mut dropped = Vec::new();
        while self.items.len() > max {
            let nonce = *self.items.keys().next_back().expect("non-empty");
            dropped.push(self.items.remove(&nonce).expect("present"));
        }
        dropped
    }
}
