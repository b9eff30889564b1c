//! Head-change maintenance: computing the transactions a reorg retracted.

use rbtp_interfaces::provider::BlockProvider;
use rbtp_primitives::{SealedHeader, TransactionSigned};
use std::collections::HashSet;
use tracing::warn;

/// Walks the retracted and adopted branches of a head change and returns
/// the transactions that were mined on the old branch but are absent from
/// the new one, oldest block first.
///
/// A plain head extension returns nothing.
pub(crate) fn find_reinjectable(
    provider: &dyn BlockProvider,
    old_head: &SealedHeader,
    new_head: &SealedHeader,
) -> Vec<TransactionSigned> {
    if new_head.parent_hash == old_head.hash() || new_head.hash() == old_head.hash() {
        return Vec::new()
    }

    let mut old_cursor = old_head.clone();
    let mut new_cursor = new_head.clone();
    // newest retracted block first; flattened oldest-first at the end so
    // per-sender nonce order survives re-admission
    let mut retracted: Vec<Vec<TransactionSigned>> = Vec::new();
    let mut adopted: HashSet<_> = HashSet::new();

    let mut body_of = |hash| match provider.block_body(hash) {
        Ok(body) => body,
        Err(err) => {
            warn!(target: "txpool", %hash, %err, "Missing body during reorg walk");
            None
        }
    };

    // level the two branches to the same height first
    while old_cursor.number > new_cursor.number {
        if let Some(body) = body_of(old_cursor.hash()) {
            retracted.push(body.transactions);
        }
        match step_back(provider, &old_cursor) {
            Some(previous) => old_cursor = previous,
            None => return dedup(retracted, adopted),
        }
    }
    while new_cursor.number > old_cursor.number {
        if let Some(body) = body_of(new_cursor.hash()) {
            adopted.extend(body.transactions.iter().map(|tx| tx.hash()));
        }
        match step_back(provider, &new_cursor) {
            Some(previous) => new_cursor = previous,
            None => return dedup(retracted, adopted),
        }
    }

    // then descend both sides to the common ancestor
    while old_cursor.hash() != new_cursor.hash() {
        if let Some(body) = body_of(old_cursor.hash()) {
            retracted.push(body.transactions);
        }
        if let Some(body) = body_of(new_cursor.hash()) {
            adopted.extend(body.transactions.iter().map(|tx| tx.hash()));
        }
        match (step_back(provider, &old_cursor), step_back(provider, &new_cursor)) {
            (Some(old_previous), Some(new_previous)) => {
                old_cursor = old_previous;
                new_cursor = new_previous;
            }
            _ => break,
        }
    }

    dedup(retracted, adopted)
}

fn step_back(provider: &dyn BlockProvider, header: &SealedHeader) -> Option<SealedHeader> {
    if header.number == 0 {
        return None
    }
    provider.sealed_header(header.parent_hash).ok().flatten()
}

fn dedup(
    retracted: Vec<Vec<TransactionSigned>>,
    adopted: HashSet<rbtp_primitives::TxHash>,
) -> Vec<TransactionSigned> {
    retracted
        .into_iter()
        .rev()
        .flatten()
        .filter(|tx| !adopted.contains(&tx.hash()))
        .collect()
}
