//! End-to-end chain management scenarios over in-memory storage.

use rbtp_blockchain::{test_utils, BlockChain, InsertFailure, TransferExecutor};
use rbtp_chainspec::DEV;
use rbtp_consensus::Btpash;
use rbtp_db::{ChainStorage, MemoryStore};
use rbtp_interfaces::{
    consensus::ConsensusError,
    provider::{BlockProvider, HeaderProvider, ImportOutcome},
    Error,
};
use rbtp_primitives::{
    sign_message, Address, Transaction, TransactionKind, TransactionSigned, B256, U256,
};
use std::sync::Arc;

fn transfer(nonce: u64, to: Address, value: u64) -> TransactionSigned {
    let tx = Transaction {
        chain_id: Some(DEV.chain_id),
        nonce,
        gas_price: 1,
        gas_limit: 21_000,
        to: TransactionKind::Call(to),
        value: U256::from(value),
        input: Default::default(),
    };
    let signature = sign_message(B256::repeat_byte(0x42), tx.signature_hash()).unwrap();
    TransactionSigned::from_transaction_and_signature(tx, signature)
}

fn funding_sender() -> Address {
    transfer(0, Address::ZERO, 0).recover_signer().unwrap()
}

/// Boots a dev chain whose genesis also funds the test sender.
fn funded_chain() -> BlockChain<MemoryStore> {
    let mut genesis = DEV.genesis.clone();
    genesis.alloc.insert(
        funding_sender(),
        rbtp_chainspec::GenesisAccount {
            balance: U256::from(10_000_000_000u64),
            ..Default::default()
        },
    );
    test_utils::test_chain(Arc::new(rbtp_chainspec::ChainSpec::from_genesis(genesis)))
}

#[test]
fn genesis_boot_allocates_and_is_stable() {
    let chain = test_utils::test_chain(Arc::clone(&*DEV));

    // the allocation is queryable at the genesis state root
    let mut state = chain.state_at(DEV.genesis_header().state_root);
    assert_eq!(
        state.balance(Address::with_last_byte(1)).unwrap(),
        U256::from(111_111_111u64)
    );
    assert_eq!(
        state.balance(Address::with_last_byte(2)).unwrap(),
        U256::from(222_222_222u64)
    );

    // the genesis hash is stable across runs
    let again = test_utils::test_chain(Arc::clone(&*DEV));
    assert_eq!(chain.head().hash, again.head().hash);
    assert_eq!(chain.head().hash, DEV.genesis_hash());
    assert_eq!(chain.canonical_hash(0).unwrap(), Some(DEV.genesis_hash()));
}

#[test]
fn extends_canonical_chain_and_emits_head_events() {
    let chain = funded_chain();
    let mut heads = chain.subscribe_head();
    let miner = Address::repeat_byte(0xaa);

    let b1 = test_utils::build_block(&chain, chain.head().hash, vec![transfer(0, miner, 5)], miner);
    let b2 = test_utils::build_block(&chain, b1.hash(), vec![transfer(1, miner, 7)], miner);

    assert_eq!(chain.insert_chain(vec![b1.clone(), b2.clone()]), Ok(2));
    assert_eq!(chain.head().number, 2);
    assert_eq!(chain.head().hash, b2.hash());
    assert_eq!(chain.canonical_hash(1).unwrap(), Some(b1.hash()));

    // events fire in order, after persistence
    assert_eq!(heads.try_recv().unwrap().block.hash(), b1.hash());
    assert_eq!(heads.try_recv().unwrap().block.hash(), b2.hash());

    // balances reflect both transfers
    let mut state = chain.state_at_head();
    assert_eq!(state.balance(miner).unwrap(), U256::from(5 + 7 + 2 * 21_000));

    // re-inserting is a no-op
    assert_eq!(chain.insert_block(b1).unwrap(), ImportOutcome::AlreadyKnown);
}

#[test]
fn heavier_branch_reorgs_and_fires_side_events() {
    let chain = funded_chain();
    let genesis = chain.head().hash;
    let mut sides = chain.subscribe_side();

    // canonical branch A of three blocks
    let miner_a = Address::repeat_byte(0xaa);
    let a1 = test_utils::build_block(&chain, genesis, vec![], miner_a);
    let a2 = test_utils::build_block(&chain, a1.hash(), vec![], miner_a);
    let a3 = test_utils::build_block(&chain, a2.hash(), vec![], miner_a);
    chain.insert_chain(vec![a1.clone(), a2.clone(), a3.clone()]).unwrap();
    assert_eq!(chain.head().hash, a3.hash());

    // branch B forks at genesis with one more block; every block carries
    // the same difficulty, so B wins on total difficulty alone
    let miner_b = Address::repeat_byte(0xbb);
    let b1 = test_utils::build_block(&chain, genesis, vec![], miner_b);
    let b2 = test_utils::build_block(&chain, b1.hash(), vec![], miner_b);
    let b3 = test_utils::build_block(&chain, b2.hash(), vec![], miner_b);
    let b4 = test_utils::build_block(&chain, b3.hash(), vec![], miner_b);

    assert_eq!(chain.insert_block(b1.clone()).unwrap(), ImportOutcome::Side);
    assert_eq!(chain.insert_block(b2.clone()).unwrap(), ImportOutcome::Side);
    assert_eq!(chain.insert_block(b3.clone()).unwrap(), ImportOutcome::Side);
    assert_eq!(chain.insert_block(b4.clone()).unwrap(), ImportOutcome::Canonical);

    assert_eq!(chain.head().hash, b4.hash());
    assert_eq!(chain.head().number, 4);
    for (number, block) in [(1, &b1), (2, &b2), (3, &b3), (4, &b4)] {
        assert_eq!(chain.canonical_hash(number).unwrap(), Some(block.hash()));
    }

    // side events fired for B1..B3 on arrival, then A1..A3 on retraction
    let mut side_hashes = Vec::new();
    while let Some(event) = sides.try_recv() {
        side_hashes.push(event.block.hash());
    }
    for displaced in [a1.hash(), a2.hash(), a3.hash()] {
        assert!(side_hashes.contains(&displaced), "missing side event for {displaced}");
    }

    // displaced blocks remain readable by hash
    assert!(chain.block_body(a3.hash()).unwrap().is_some());
}

#[test]
fn equal_total_difficulty_keeps_first_seen_tip() {
    let chain = funded_chain();
    let genesis = chain.head().hash;

    let a1 = test_utils::build_block(&chain, genesis, vec![], Address::repeat_byte(0xaa));
    let b1 = test_utils::build_block(&chain, genesis, vec![], Address::repeat_byte(0xbb));
    chain.insert_block(a1.clone()).unwrap();

    // same height, same difficulty: the incumbent stays
    assert_eq!(chain.insert_block(b1).unwrap(), ImportOutcome::Side);
    assert_eq!(chain.head().hash, a1.hash());
}

#[test]
fn invalid_block_is_poisoned_and_remembered() {
    let chain = funded_chain();
    let miner = Address::repeat_byte(0xaa);

    let mut bad = test_utils::build_block(&chain, chain.head().hash, vec![], miner);
    let mut header = bad.header.unseal();
    header.state_root = B256::repeat_byte(0x66);
    bad.header = header.seal_slow();

    let first = chain.insert_block(bad.clone()).unwrap_err();
    assert!(matches!(first, Error::Consensus(ConsensusError::BodyStateRootDiff(_))));

    // the hash is poisoned: the remembered error comes back immediately
    let second = chain.insert_block(bad.clone()).unwrap_err();
    assert_eq!(first, second);
    assert!(chain.bad_blocks().iter().any(|(hash, _)| *hash == bad.hash()));

    // the batch insert reports the failing index
    let good = test_utils::build_block(&chain, chain.head().hash, vec![], miner);
    let result = chain.insert_chain(vec![good, bad]);
    assert!(matches!(result, Err(InsertFailure { index: 1, .. })));
    assert_eq!(chain.head().number, 1);
}

#[test]
fn gas_used_mismatch_rejects_block() {
    let chain = funded_chain();
    let mut bad =
        test_utils::build_block(&chain, chain.head().hash, vec![], Address::repeat_byte(1));
    let mut header = bad.header.unseal();
    header.gas_used += 1;
    bad.header = header.seal_slow();

    assert!(matches!(
        chain.insert_block(bad),
        Err(Error::Consensus(ConsensusError::BlockGasUsedDiff(_)))
    ));
}

#[test]
fn unknown_parent_is_not_poisoned() {
    let chain = funded_chain();
    let orphan = {
        let mut block =
            test_utils::build_block(&chain, chain.head().hash, vec![], Address::repeat_byte(1));
        let mut header = block.header.unseal();
        header.parent_hash = B256::repeat_byte(0x99);
        block.header = header.seal_slow();
        block
    };
    assert!(matches!(
        chain.insert_block(orphan.clone()),
        Err(Error::Consensus(ConsensusError::ParentUnknown { .. }))
    ));
    assert!(chain.bad_blocks().is_empty());
}

#[test]
fn proof_of_work_seal_gates_import() {
    // a real engine instead of the permissive test consensus
    let storage = Arc::new(ChainStorage::open(MemoryStore::new(), None).unwrap());
    let engine = Arc::new(Btpash::new(Arc::clone(&*DEV)));
    let executor = Arc::new(TransferExecutor::new(Arc::clone(&*DEV)));
    let chain =
        BlockChain::new(storage, Arc::clone(&*DEV), engine, executor, Default::default()).unwrap();

    let head_before = chain.head().hash;
    // consistent roots, but a fabricated seal
    let unsealed = test_utils::build_block(&chain, head_before, vec![], Address::repeat_byte(2));
    assert!(matches!(
        chain.insert_block(unsealed.clone()),
        Err(Error::Consensus(ConsensusError::InvalidSeal))
    ));
    assert_eq!(chain.head().hash, head_before, "head must not move on a bad seal");
    assert!(chain.bad_blocks().iter().any(|(hash, _)| *hash == unsealed.hash()));
}

#[test]
fn set_head_rewinds_canonical_index() {
    let chain = funded_chain();
    let miner = Address::repeat_byte(0xaa);
    let b1 = test_utils::build_block(&chain, chain.head().hash, vec![], miner);
    let b2 = test_utils::build_block(&chain, b1.hash(), vec![], miner);
    let b3 = test_utils::build_block(&chain, b2.hash(), vec![], miner);
    chain.insert_chain(vec![b1.clone(), b2, b3]).unwrap();

    chain.set_head(1).unwrap();
    assert_eq!(chain.head().number, 1);
    assert_eq!(chain.head().hash, b1.hash());
    assert_eq!(chain.canonical_hash(2).unwrap(), None);
    assert_eq!(chain.canonical_hash(3).unwrap(), None);

    // the dropped blocks can be mined again
    let b2_again = test_utils::build_block(&chain, b1.hash(), vec![], miner);
    assert_eq!(chain.insert_block(b2_again).unwrap(), ImportOutcome::Canonical);
}

mod restart {
    //! Restart durability over the file-backed hot tier: a new process
    //! resumes at the persisted head, and a write torn by a crash rolls
    //! the in-flight import back without touching earlier blocks.

    use super::*;
    use rbtp_db::FileStore;
    use std::{fs::OpenOptions, io::Write, path::Path};

    fn open_chain(path: &Path) -> BlockChain<FileStore> {
        let store = FileStore::open(path).unwrap();
        let storage = Arc::new(ChainStorage::open(store, None).unwrap());
        let consensus = Arc::new(rbtp_interfaces::test_utils::TestConsensus::default());
        let executor = Arc::new(TransferExecutor::new(Arc::clone(&*DEV)));
        BlockChain::new(
            storage,
            Arc::clone(&*DEV),
            consensus,
            executor,
            Default::default(),
        )
        .unwrap()
    }

    #[test]
    fn new_process_resumes_at_the_persisted_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chaindata");

        let head = {
            let chain = open_chain(&path);
            let b1 = test_utils::build_block(
                &chain,
                chain.head().hash,
                vec![],
                Address::repeat_byte(7),
            );
            let b2 = test_utils::build_block(&chain, b1.hash(), vec![], Address::repeat_byte(7));
            chain.insert_chain(vec![b1, b2]).unwrap();
            chain.head()
        };

        // a fresh process shares nothing with the first but the files
        let reopened = open_chain(&path);
        assert_eq!(reopened.head(), head);
        assert_eq!(reopened.canonical_hash(2).unwrap(), Some(head.hash));
        assert_eq!(reopened.canonical_hash(0).unwrap(), Some(DEV.genesis_hash()));

        // state is readable at the recovered head
        let mut state = reopened.state_at_head();
        assert_eq!(
            state.balance(Address::with_last_byte(1)).unwrap(),
            U256::from(111_111_111u64)
        );

        // and the chain keeps growing from where it stopped
        let b3 =
            test_utils::build_block(&reopened, head.hash, vec![], Address::repeat_byte(7));
        assert_eq!(reopened.insert_block(b3).unwrap(), ImportOutcome::Canonical);
        assert_eq!(reopened.head().number, 3);
    }

    #[test]
    fn torn_write_rolls_back_to_the_previous_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chaindata");

        let (head_before, b2) = {
            let chain = open_chain(&path);
            let b1 = test_utils::build_block(
                &chain,
                chain.head().hash,
                vec![],
                Address::repeat_byte(7),
            );
            chain.insert_block(b1.clone()).unwrap();
            let b2 = test_utils::build_block(&chain, b1.hash(), vec![], Address::repeat_byte(7));
            (chain.head(), b2)
        };
        let persisted = std::fs::metadata(&path).unwrap().len();

        {
            let chain = open_chain(&path);
            chain.insert_block(b2.clone()).unwrap();
            assert_eq!(chain.head().hash, b2.hash());
        }

        // crash mid-write: everything the second import logged is cut off
        // and a partial frame is left dangling
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(persisted).unwrap();
        drop(file);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0, 0, 1, 0, 0xde, 0xad]).unwrap();
        drop(file);

        // the interrupted import rolled back whole; the head is the last
        // fully persisted one
        let reopened = open_chain(&path);
        assert_eq!(reopened.head(), head_before);

        // re-offering the block simply finishes the import
        assert_eq!(reopened.insert_block(b2.clone()).unwrap(), ImportOutcome::Canonical);
        assert_eq!(reopened.head().hash, b2.hash());
    }
}

#[test]
fn reopen_over_shared_storage_recovers_head() {
    // same-process re-instantiation over a live storage handle; the real
    // restart path is covered by the `restart` module above
    let storage = Arc::new(ChainStorage::open(MemoryStore::new(), None).unwrap());
    let spec = Arc::clone(&*DEV);
    let head_after_insert = {
        let consensus = Arc::new(rbtp_interfaces::test_utils::TestConsensus::default());
        let executor = Arc::new(TransferExecutor::new(Arc::clone(&spec)));
        let chain = BlockChain::new(
            Arc::clone(&storage),
            Arc::clone(&spec),
            consensus,
            executor,
            Default::default(),
        )
        .unwrap();
        let b1 =
            test_utils::build_block(&chain, chain.head().hash, vec![], Address::repeat_byte(7));
        chain.insert_block(b1).unwrap();
        chain.head()
    };

    // reopen over the same storage: the head and its state survive
    let consensus = Arc::new(rbtp_interfaces::test_utils::TestConsensus::default());
    let executor = Arc::new(TransferExecutor::new(Arc::clone(&spec)));
    let reopened =
        BlockChain::new(storage, spec, consensus, executor, Default::default()).unwrap();
    assert_eq!(reopened.head(), head_after_insert);
    let mut state = reopened.state_at_head();
    assert_eq!(
        state.balance(Address::with_last_byte(1)).unwrap(),
        U256::from(111_111_111u64)
    );
}
