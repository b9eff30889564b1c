//! Helpers for assembling consistent blocks in tests.

use crate::{BlockChain, TransferExecutor};
use rbtp_chainspec::{ChainSpec, Hardfork};
use rbtp_db::{ChainStorage, KeyValueStore, MemoryStore};
use rbtp_interfaces::{consensus::Consensus, executor::BlockExecutor, provider::HeaderProvider};
use rbtp_primitives::{
    recover_signers, Address, Bloom, Header, SealedBlock, TransactionSigned, B256,
};
use rbtp_trie::StateDb;
use std::sync::Arc;

/// Builds a block on `parent_hash` whose roots, bloom and gas figures are
/// consistent with executing `transactions`, so the import pipeline accepts
/// it.
///
/// `beneficiary` doubles as branch salt: two branches built with different
/// beneficiaries get distinct hashes at every height.
pub fn build_block<S: KeyValueStore + 'static>(
    chain: &BlockChain<S>,
    parent_hash: B256,
    transactions: Vec<TransactionSigned>,
    beneficiary: Address,
) -> SealedBlock {
    let parent = chain
        .storage
        .sealed_header(parent_hash)
        .expect("storage read")
        .expect("parent exists");

    let mut header = Header {
        parent_hash,
        beneficiary,
        number: parent.number + 1,
        gas_limit: parent.gas_limit,
        timestamp: parent.timestamp + 13,
        ..Default::default()
    };
    header.difficulty = chain.consensus.calc_difficulty(&parent, header.timestamp);

    let draft = SealedBlock {
        header: header.clone().seal_slow(),
        body: transactions.clone(),
        ommers: Vec::new(),
    };
    let senders = recover_signers(&transactions).expect("valid signatures");

    // dry-run the block to learn the roots the header must commit to
    let mut state = StateDb::at(parent.state_root, chain.trie_db());
    let output =
        chain.executor.execute(&draft, &senders, &mut state).expect("executable transactions");
    chain
        .consensus
        .finalize(&header, &[], &mut state)
        .expect("finalize");

    let prune_empty = chain.spec.fork_active(Hardfork::SpuriousDragon, header.number);
    header.state_root = state.commit(prune_empty).expect("commit");
    header.gas_used = output.gas_used;

    let receipts: Vec<_> = output.receipts.iter().map(|r| r.clone().with_bloom()).collect();
    header.receipts_root = rbtp_trie::root::calculate_receipt_root(&receipts);
    header.transactions_root = rbtp_trie::root::calculate_transaction_root(&transactions);
    header.logs_bloom = receipts.iter().fold(Bloom::ZERO, |acc, r| acc | r.bloom);

    SealedBlock { header: header.seal_slow(), body: transactions, ommers: Vec::new() }
}

/// A chain over in-memory storage with the permissive test consensus and
/// the transfer executor.
pub fn test_chain(spec: Arc<ChainSpec>) -> BlockChain<MemoryStore> {
    let storage = Arc::new(ChainStorage::open(MemoryStore::new(), None).expect("open storage"));
    let consensus: Arc<dyn Consensus> =
        Arc::new(rbtp_interfaces::test_utils::TestConsensus::default());
    let executor: Arc<dyn BlockExecutor> = Arc::new(TransferExecutor::new(Arc::clone(&spec)));
    BlockChain::new(storage, spec, consensus, executor, Default::default())
        .expect("chain boots")
}
