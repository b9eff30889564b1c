//! Manager, propagation and fetcher behavior over in-memory sessions.

use crate::{
    fetcher::{BlockFetcher, FetcherCommand},
    manager::{NetworkConfig, NetworkManager, PeerEvent},
    peers::Session,
};
use rbtp_blockchain::{test_utils, BlockChain};
use rbtp_chainspec::{ChainSpec, ForkHash, ForkId, DEV};
use rbtp_db::MemoryStore;
use rbtp_interfaces::{
    p2p::{download::DownloadClient, headers::HeadersClient, headers::HeadersRequest},
    provider::{BlockProvider, HeaderProvider},
};
use rbtp_primitives::{
    sign_message, Address, PeerId, SealedBlock, Transaction, TransactionKind, TransactionSigned,
    B256, U256,
};
use rbtp_trie::TrieDb;
use rbtp_txpool::{PoolConfig, TxPool};
use rbtp_wire::{
    BlockHashNumber, BlockHeaders, BtpMessage, BtpVersion, GetBlockBodies, GetBlockHeaders,
    NewBlockHashes, Status, Transactions,
};
use rbtp_primitives::{BlockHashOrNumber, HeadersDirection};
use std::sync::Arc;
use tokio::sync::mpsc;

const SECRET: B256 = B256::repeat_byte(0x42);

fn transfer(nonce: u64) -> TransactionSigned {
    let tx = Transaction {
        chain_id: Some(DEV.chain_id),
        nonce,
        gas_price: 1,
        gas_limit: 21_000,
        to: TransactionKind::Call(Address::repeat_byte(9)),
        value: U256::from(1),
        input: Default::default(),
    };
    let signature = sign_message(SECRET, tx.signature_hash()).unwrap();
    TransactionSigned::from_transaction_and_signature(tx, signature)
}

struct Harness {
    manager: Arc<NetworkManager>,
    chain: Arc<BlockChain<MemoryStore>>,
    pool: Arc<TxPool>,
    fetcher_rx: mpsc::UnboundedReceiver<FetcherCommand>,
}

fn setup() -> Harness {
    let mut genesis = DEV.genesis.clone();
    genesis.alloc.insert(
        transfer(0).recover_signer().unwrap(),
        rbtp_chainspec::GenesisAccount { balance: U256::from(10_000_000u64), ..Default::default() },
    );
    let spec = Arc::new(ChainSpec::from_genesis(genesis));
    let chain = Arc::new(test_utils::test_chain(Arc::clone(&spec)));
    let head = chain.sealed_header(chain.head().hash).unwrap().unwrap();
    let pool = Arc::new(TxPool::new(
        PoolConfig::default(),
        Arc::clone(&spec),
        Arc::clone(&chain) as _,
        head,
    ));

    let (fetcher_tx, fetcher_rx) = mpsc::unbounded_channel();
    let manager = Arc::new(NetworkManager::new(
        NetworkConfig { network_id: 1337, max_peers: 16 },
        spec,
        Arc::clone(&chain) as Arc<dyn BlockProvider>,
        Arc::clone(chain.storage()) as Arc<dyn TrieDb>,
        Arc::clone(&pool),
        fetcher_tx,
    ));
    Harness { manager, chain, pool, fetcher_rx }
}

/// Connects a fully handshaked peer, returning its id and outbound queue.
fn connect(harness: &Harness) -> (PeerId, mpsc::UnboundedReceiver<BtpMessage>) {
    let peer_id = PeerId::random();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    harness.manager.handle_event(PeerEvent::SessionEstablished {
        peer_id,
        version: BtpVersion::Btp64,
        session: Session { outgoing: out_tx },
    });
    // the manager leads with its own status
    let ours = match out_rx.try_recv().unwrap() {
        BtpMessage::Status(status) => status,
        other => panic!("expected status, got {other:?}"),
    };

    let theirs = Status {
        version: BtpVersion::Btp64.into(),
        network_id: ours.network_id,
        total_difficulty: U256::from(1u64),
        head: ours.genesis,
        genesis: ours.genesis,
        fork_id: ours.fork_id,
    };
    harness
        .manager
        .handle_event(PeerEvent::Message { peer_id, message: BtpMessage::Status(theirs) });
    assert!(harness.manager.peers().contains(&peer_id), "handshake should succeed");
    (peer_id, out_rx)
}

#[test]
fn handshake_rejects_mismatches() {
    let harness = setup();
    let genesis = harness.chain.head().hash;

    let cases = [
        // wrong network id
        Status {
            version: 64,
            network_id: 999,
            total_difficulty: U256::ZERO,
            head: genesis,
            genesis,
            fork_id: None,
        },
        // wrong genesis
        Status {
            version: 64,
            network_id: 1337,
            total_difficulty: U256::ZERO,
            head: genesis,
            genesis: B256::repeat_byte(0x13),
            fork_id: None,
        },
        // alien fork id
        Status {
            version: 64,
            network_id: 1337,
            total_difficulty: U256::ZERO,
            head: genesis,
            genesis,
            fork_id: Some(ForkId { hash: ForkHash([9, 9, 9, 9]), next: 0 }),
        },
    ];

    for status in cases {
        let peer_id = PeerId::random();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        harness.manager.handle_event(PeerEvent::SessionEstablished {
            peer_id,
            version: BtpVersion::Btp64,
            session: Session { outgoing: out_tx },
        });
        harness
            .manager
            .handle_event(PeerEvent::Message { peer_id, message: BtpMessage::Status(status) });
        assert!(!harness.manager.peers().contains(&peer_id));
    }
}

#[test]
fn serves_headers_with_skip_and_direction() {
    let harness = setup();
    let miner = Address::repeat_byte(0xaa);
    let mut parent = harness.chain.head().hash;
    for _ in 0..5 {
        let block = test_utils::build_block(&harness.chain, parent, vec![], miner);
        parent = block.hash();
        harness.chain.insert_block(block).unwrap();
    }

    let (peer_id, mut out_rx) = connect(&harness);

    harness.manager.handle_event(PeerEvent::Message {
        peer_id,
        message: BtpMessage::GetBlockHeaders(GetBlockHeaders {
            start_block: BlockHashOrNumber::Number(0),
            limit: 3,
            skip: 1,
            direction: HeadersDirection::Rising,
        }),
    });

    match out_rx.try_recv().unwrap() {
        BtpMessage::BlockHeaders(BlockHeaders(headers)) => {
            assert_eq!(
                headers.iter().map(|h| h.number).collect::<Vec<_>>(),
                vec![0, 2, 4],
                "skip must leave gaps"
            );
        }
        other => panic!("expected headers, got {other:?}"),
    }

    harness.manager.handle_event(PeerEvent::Message {
        peer_id,
        message: BtpMessage::GetBlockHeaders(GetBlockHeaders {
            start_block: BlockHashOrNumber::Number(4),
            limit: 10,
            skip: 0,
            direction: HeadersDirection::Falling,
        }),
    });
    match out_rx.try_recv().unwrap() {
        BtpMessage::BlockHeaders(BlockHeaders(headers)) => {
            assert_eq!(
                headers.iter().map(|h| h.number).collect::<Vec<_>>(),
                vec![4, 3, 2, 1, 0]
            );
        }
        other => panic!("expected headers, got {other:?}"),
    }
}

#[test]
fn serves_bodies_and_state_nodes() {
    let harness = setup();
    let miner = Address::repeat_byte(0xaa);
    let block =
        test_utils::build_block(&harness.chain, harness.chain.head().hash, vec![transfer(0)], miner);
    harness.chain.insert_block(block.clone()).unwrap();

    let (peer_id, mut out_rx) = connect(&harness);

    harness.manager.handle_event(PeerEvent::Message {
        peer_id,
        message: BtpMessage::GetBlockBodies(GetBlockBodies(vec![block.hash()])),
    });
    match out_rx.try_recv().unwrap() {
        BtpMessage::BlockBodies(bodies) => {
            assert_eq!(bodies.0.len(), 1);
            assert_eq!(bodies.0[0].transactions.len(), 1);
        }
        other => panic!("expected bodies, got {other:?}"),
    }

    // the genesis state root node is servable
    let state_root = harness.chain.spec().genesis_header().state_root;
    harness.manager.handle_event(PeerEvent::Message {
        peer_id,
        message: BtpMessage::GetNodeData(rbtp_wire::GetNodeData(vec![state_root])),
    });
    match out_rx.try_recv().unwrap() {
        BtpMessage::NodeData(nodes) => assert_eq!(nodes.0.len(), 1),
        other => panic!("expected node data, got {other:?}"),
    }
}

#[test]
fn ingests_broadcast_transactions() {
    let harness = setup();
    let (peer_id, mut out_rx) = connect(&harness);

    let tx = transfer(0);
    harness.manager.handle_event(PeerEvent::Message {
        peer_id,
        message: BtpMessage::Transactions(Transactions(vec![tx.clone()])),
    });
    assert!(harness.pool.contains(&tx.hash()));

    // the sending peer is never echoed its own transaction
    let pooled = harness.pool.get(&tx.hash()).unwrap();
    harness.manager.propagate_transactions(&[Arc::clone(&pooled.transaction)]);
    assert!(out_rx.try_recv().is_err());
}

#[test]
fn block_propagation_follows_sqrt_policy() {
    let harness = setup();
    let mut receivers = Vec::new();
    for _ in 0..4 {
        receivers.push(connect(&harness));
    }

    let miner = Address::repeat_byte(0xaa);
    let block = test_utils::build_block(&harness.chain, harness.chain.head().hash, vec![], miner);
    harness.chain.insert_block(block.clone()).unwrap();
    harness.manager.propagate_block(&block, U256::from(2u64));

    let mut full = 0;
    let mut announced = 0;
    for (_, out_rx) in &mut receivers {
        match out_rx.try_recv().unwrap() {
            BtpMessage::NewBlock(msg) => {
                assert_eq!(msg.block.header.number, block.number);
                full += 1;
            }
            BtpMessage::NewBlockHashes(NewBlockHashes(hashes)) => {
                assert_eq!(hashes[0].hash, block.hash());
                announced += 1;
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
    // √4 peers get the body, the rest only the hash
    assert_eq!((full, announced), (2, 2));

    // a second propagation is suppressed by the known-blocks cache
    harness.manager.propagate_block(&block, U256::from(2u64));
    for (_, out_rx) in &mut receivers {
        assert!(out_rx.try_recv().is_err());
    }
}

#[test]
fn announces_are_routed_to_the_fetcher() {
    let mut harness = setup();
    let (peer_id, _out_rx) = connect(&harness);

    harness.manager.handle_event(PeerEvent::Message {
        peer_id,
        message: BtpMessage::NewBlockHashes(NewBlockHashes(vec![BlockHashNumber {
            hash: B256::repeat_byte(0x11),
            number: 1,
        }])),
    });

    match harness.fetcher_rx.try_recv().unwrap() {
        FetcherCommand::Announced { peer, hash, number } => {
            assert_eq!(peer, peer_id);
            assert_eq!(hash, B256::repeat_byte(0x11));
            assert_eq!(number, 1);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn unsolicited_responses_are_struck() {
    let harness = setup();
    let (peer_id, _out_rx) = connect(&harness);

    harness.manager.handle_event(PeerEvent::Message {
        peer_id,
        message: BtpMessage::BlockHeaders(BlockHeaders(vec![])),
    });
    assert_eq!(harness.manager.peers().strikes(&peer_id), Some(1));
}

#[test]
fn fetch_client_roundtrip_and_timeout() {
    let harness = setup();
    let (peer_id, mut out_rx) = connect(&harness);
    let client = harness.manager.fetch_client();

    // roundtrip
    let fut = client.get_headers(HeadersRequest::rising(0u64, 1));
    match out_rx.try_recv().unwrap() {
        BtpMessage::GetBlockHeaders(_) => {}
        other => panic!("expected headers request, got {other:?}"),
    }
    let genesis = harness.chain.header_by_number(0).unwrap().unwrap();
    harness.manager.handle_event(PeerEvent::Message {
        peer_id,
        message: BtpMessage::BlockHeaders(BlockHeaders(vec![genesis.clone()])),
    });
    let response = futures::executor::block_on(fut).unwrap();
    assert_eq!(response.peer_id(), peer_id);
    assert_eq!(response.data(), &vec![genesis]);

    // timeout: the pending request expires and the peer takes a strike
    let fut = client.get_headers(HeadersRequest::rising(0u64, 1));
    let _ = out_rx.try_recv().unwrap();
    client.tick(std::time::Instant::now() + crate::fetch::REQUEST_TIMEOUT * 2);
    let result = futures::executor::block_on(fut);
    assert!(matches!(
        result,
        Err(rbtp_interfaces::p2p::error::RequestError::Timeout)
    ));
    assert_eq!(harness.manager.peers().strikes(&peer_id), Some(1));
}

#[tokio::test(start_paused = true)]
async fn fetcher_pulls_announced_block() {
    let harness = setup();
    let (peer_id, mut out_rx) = connect(&harness);

    let client = harness.manager.fetch_client();
    let (commands, commands_rx) = mpsc::unbounded_channel();
    let fetcher = BlockFetcher::new(
        client.clone(),
        Arc::clone(&harness.chain),
        Arc::clone(&harness.chain) as Arc<dyn BlockProvider>,
        commands_rx,
    );
    tokio::spawn(fetcher.run());

    // the block exists off-chain; the peer will serve it on request
    let block = test_utils::build_block(
        &harness.chain,
        harness.chain.head().hash,
        vec![],
        Address::repeat_byte(0xcc),
    );
    let announced: SealedBlock = block.clone();

    // script the peer: answer header and body requests through the manager
    let manager = Arc::clone(&harness.manager);
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            match message {
                BtpMessage::GetBlockHeaders(_) => {
                    manager.handle_event(PeerEvent::Message {
                        peer_id,
                        message: BtpMessage::BlockHeaders(BlockHeaders(vec![
                            announced.header().clone()
                        ])),
                    });
                }
                BtpMessage::GetBlockBodies(_) => {
                    manager.handle_event(PeerEvent::Message {
                        peer_id,
                        message: BtpMessage::BlockBodies(rbtp_wire::BlockBodies(vec![
                            rbtp_primitives::BlockBody {
                                transactions: announced.body.clone(),
                                ommers: announced.ommers.clone(),
                            },
                        ])),
                    });
                }
                _ => {}
            }
        }
    });

    commands
        .send(FetcherCommand::Announced { peer: peer_id, hash: block.hash(), number: block.number })
        .unwrap();

    // the arrival delay is virtual under paused time
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if harness.chain.head().hash == block.hash() {
            return
        }
    }
    panic!("announced block was never imported");
}

#[tokio::test(start_paused = true)]
async fn fetcher_enforces_announce_quota() {
    let harness = setup();
    let (peer_id, _out_rx) = connect(&harness);

    let client = harness.manager.fetch_client();
    let (_commands, commands_rx) = mpsc::unbounded_channel();
    let mut fetcher = BlockFetcher::new(
        client.clone(),
        Arc::clone(&harness.chain),
        Arc::clone(&harness.chain) as Arc<dyn BlockProvider>,
        commands_rx,
    );

    // flood with in-range announces; the quota trips and the peer is
    // eventually dropped by accumulated strikes
    for i in 0..300u64 {
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&i.to_be_bytes());
        fetcher_test_announce(&mut fetcher, peer_id, B256::from(hash), 1);
    }
    assert!(client.num_connected_peers() == 0 || harness.manager.peers().strikes(&peer_id).is_some());
}

// test-only shim over the private announce path
fn fetcher_test_announce<I: rbtp_interfaces::provider::BlockImport + 'static>(
    fetcher: &mut BlockFetcher<I>,
    peer: PeerId,
    hash: B256,
    number: u64,
) {
    fetcher.handle_announce_for_tests(peer, hash, number);
}
