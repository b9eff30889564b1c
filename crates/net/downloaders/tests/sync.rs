//! Bulk sync scenarios: a fresh node pulling a served chain in every mode.

use rbtp_blockchain::{test_utils, BlockChain};
use rbtp_chainspec::{ChainSpec, GenesisAccount, DEV};
use rbtp_db::MemoryStore;
use rbtp_downloaders::{Downloader, SyncMode, PIVOT_DISTANCE};
use futures::future::{ready, Ready};
use rbtp_interfaces::{
    p2p::{
        bodies::BodiesClient,
        download::DownloadClient,
        error::{DownloadError, PeerRequestResult},
        headers::{HeadersClient, HeadersRequest},
        priority::Priority,
        receipts::ReceiptsClient,
        state::NodeDataClient,
    },
    provider::{BlockProvider, HeaderProvider},
    test_utils::{TestBodiesClient, TestHeadersClient, TestReceiptsClient},
};
use rbtp_primitives::{
    sign_message, Address, BlockBody, Bytes, PeerId, Transaction, TransactionKind,
    TransactionSigned, WithPeerId, B256, U256,
};
use rbtp_trie::TrieDb;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const SECRET: B256 = B256::repeat_byte(0x42);

fn transfer(nonce: u64) -> TransactionSigned {
    let tx = Transaction {
        chain_id: Some(DEV.chain_id),
        nonce,
        gas_price: 1,
        gas_limit: 21_000,
        to: TransactionKind::Call(Address::repeat_byte(0x99)),
        value: U256::from(7),
        input: Default::default(),
    };
    let signature = sign_message(SECRET, tx.signature_hash()).unwrap();
    TransactionSigned::from_transaction_and_signature(tx, signature)
}

fn spec() -> Arc<ChainSpec> {
    let mut genesis = DEV.genesis.clone();
    genesis.alloc.insert(
        transfer(0).recover_signer().unwrap(),
        GenesisAccount { balance: U256::from(u64::MAX), ..Default::default() },
    );
    Arc::new(ChainSpec::from_genesis(genesis))
}

/// One object serving all four download client roles from a canned chain.
#[derive(Debug, Default)]
struct TestSyncClient {
    headers: TestHeadersClient,
    bodies: TestBodiesClient,
    receipts: TestReceiptsClient,
    /// Content-addressed source of state nodes and code blobs.
    nodes: Option<Arc<dyn TrieDb>>,
    peer_id: PeerId,
}

impl DownloadClient for TestSyncClient {
    fn report_bad_message(&self, peer_id: PeerId) {
        self.headers.report_bad_message(peer_id);
    }

    fn num_connected_peers(&self) -> usize {
        1
    }
}

impl HeadersClient for TestSyncClient {
    type Output = <TestHeadersClient as HeadersClient>::Output;

    fn get_headers_with_priority(
        &self,
        request: HeadersRequest,
        priority: Priority,
    ) -> Self::Output {
        self.headers.get_headers_with_priority(request, priority)
    }
}

impl BodiesClient for TestSyncClient {
    type Output = <TestBodiesClient as BodiesClient>::Output;

    fn get_block_bodies_with_priority(
        &self,
        hashes: Vec<B256>,
        priority: Priority,
    ) -> Self::Output {
        self.bodies.get_block_bodies_with_priority(hashes, priority)
    }
}

impl ReceiptsClient for TestSyncClient {
    type Output = <TestReceiptsClient as ReceiptsClient>::Output;

    fn get_receipts(&self, hashes: Vec<B256>) -> Self::Output {
        self.receipts.get_receipts(hashes)
    }
}

impl NodeDataClient for TestSyncClient {
    type Output = Ready<PeerRequestResult<Vec<Bytes>>>;

    fn get_node_data(&self, hashes: Vec<B256>) -> Self::Output {
        let result = match &self.nodes {
            Some(db) => {
                hashes.iter().filter_map(|hash| db.node(*hash).map(Bytes::from)).collect()
            }
            None => Vec::new(),
        };
        ready(Ok(WithPeerId::new(self.peer_id, result)))
    }
}

/// Builds a remote chain of `height` blocks, one transfer each, and a
/// client serving it, state nodes included.
fn remote_chain(height: u64) -> (Arc<BlockChain<MemoryStore>>, Arc<TestSyncClient>) {
    let chain = Arc::new(test_utils::test_chain(spec()));
    let miner = Address::repeat_byte(0xaa);
    for nonce in 0..height {
        let parent = chain.head().hash;
        let block = test_utils::build_block(&chain, parent, vec![transfer(nonce)], miner);
        chain.insert_block(block).unwrap();
    }

    let mut client = TestSyncClient::default();
    client.nodes = Some(Arc::clone(chain.storage()) as Arc<dyn TrieDb>);
    for number in 0..=height {
        let hash = chain.canonical_hash(number).unwrap().unwrap();
        let header = chain.header(hash).unwrap().unwrap();
        client.headers.extend([header]);

        let body = chain.block_body(hash).unwrap().unwrap();
        client.bodies.insert(
            hash,
            BlockBody { transactions: body.transactions, ommers: body.ommers },
        );

        let receipts = chain.receipts(hash).unwrap().unwrap();
        client
            .receipts
            .insert(hash, receipts.into_iter().map(|r| r.with_bloom()).collect());
    }

    (chain, Arc::new(client))
}

fn local_node(
    mode: SyncMode,
    client: Arc<TestSyncClient>,
) -> (Arc<BlockChain<MemoryStore>>, Downloader<rbtp_interfaces::test_utils::TestConsensus, TestSyncClient, BlockChain<MemoryStore>>) {
    let chain = Arc::new(test_utils::test_chain(spec()));
    let consensus = Arc::new(rbtp_interfaces::test_utils::TestConsensus::default());
    let state_store: Arc<dyn TrieDb> = Arc::clone(chain.storage()) as Arc<dyn TrieDb>;
    let downloader = Downloader::new(
        mode,
        consensus,
        client,
        Arc::clone(&chain),
        Arc::clone(&chain) as Arc<dyn BlockProvider>,
        state_store,
    );
    (chain, downloader)
}

#[tokio::test]
async fn full_sync_reaches_the_target() {
    let (remote, client) = remote_chain(20);
    let (local, downloader) = local_node(SyncMode::Full, client);

    let outcome =
        downloader.run(remote.head().hash, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.imported, 20);
    assert_eq!(local.head().hash, remote.head().hash);
    assert_eq!(local.head().number, 20);

    // the replayed state matches the remote's
    let beneficiary = Address::repeat_byte(0x99);
    let mut local_state = local.state_at_head();
    assert_eq!(local_state.balance(beneficiary).unwrap(), U256::from(7 * 20));
}

#[tokio::test]
async fn full_sync_spans_multiple_skeleton_sections() {
    // tall enough that the skeleton phase (192-spaced pivots) kicks in,
    // with a contiguous tail after the last pivot
    let (remote, client) = remote_chain(400);
    let (local, downloader) = local_node(SyncMode::Full, client);

    let outcome =
        downloader.run(remote.head().hash, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.imported, 400);
    assert_eq!(local.head().hash, remote.head().hash);
    for number in [1u64, 192, 193, 384, 400] {
        assert_eq!(
            local.canonical_hash(number).unwrap(),
            remote.canonical_hash(number).unwrap()
        );
    }
}

#[tokio::test]
async fn full_sync_is_idempotent_at_the_tip() {
    let (remote, client) = remote_chain(5);
    let (local, downloader) = local_node(SyncMode::Full, client);

    downloader.run(remote.head().hash, CancellationToken::new()).await.unwrap();
    let again = downloader.run(remote.head().hash, CancellationToken::new()).await.unwrap();
    assert_eq!(again.imported, 0);
    assert_eq!(local.head().hash, remote.head().hash);
}

#[tokio::test]
async fn light_sync_keeps_headers_only() {
    let (remote, client) = remote_chain(12);
    let (local, downloader) = local_node(SyncMode::Light, client);

    let outcome =
        downloader.run(remote.head().hash, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.imported, 12);

    // headers are canonical, bodies never arrived
    let tip_hash = local.canonical_hash(12).unwrap().unwrap();
    assert_eq!(tip_hash, remote.head().hash);
    assert!(local.header(tip_hash).unwrap().is_some());
    assert!(local.block_body(tip_hash).unwrap().is_none());
}

#[tokio::test]
async fn fast_sync_pivots_and_catches_up() {
    let height = PIVOT_DISTANCE + 36;
    let (remote, client) = remote_chain(height);
    let (local, downloader) = local_node(SyncMode::Fast, client);

    let outcome =
        downloader.run(remote.head().hash, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.imported, height);
    assert_eq!(local.head().hash, remote.head().hash);

    let pivot_number = height - PIVOT_DISTANCE;
    let pivot_hash = local.canonical_hash(pivot_number).unwrap().unwrap();
    let pivot_header = local.header(pivot_hash).unwrap().unwrap();

    // the pivot state arrived in full: accounts are readable at its root
    let mut pivot_state = local.state_at(pivot_header.state_root);
    assert_eq!(
        pivot_state.balance(Address::repeat_byte(0x99)).unwrap(),
        U256::from(7 * pivot_number)
    );

    // bodies and receipts below the pivot landed without execution
    assert!(local.block_body(pivot_hash).unwrap().is_some());
    assert!(local.receipts(pivot_hash).unwrap().is_some());

    // state of an early block was never downloaded
    let early_hash = local.canonical_hash(1).unwrap().unwrap();
    let early_root = local.header(early_hash).unwrap().unwrap().state_root;
    let local_nodes: Arc<dyn TrieDb> = Arc::clone(local.storage()) as Arc<dyn TrieDb>;
    assert!(!local_nodes.contains_node(early_root), "early state must be absent");
}

#[tokio::test]
async fn unknown_target_fails_cleanly() {
    let (_remote, client) = remote_chain(3);
    let (_local, downloader) = local_node(SyncMode::Full, client);

    let result = downloader.run(B256::repeat_byte(0x13), CancellationToken::new()).await;
    assert!(matches!(result, Err(DownloadError::EmptyResponse)));
}

#[tokio::test]
async fn cancellation_stops_the_run() {
    let (remote, client) = remote_chain(10);
    let (_local, downloader) = local_node(SyncMode::Full, client);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = downloader.run(remote.head().hash, cancel).await;
    assert!(matches!(result, Err(DownloadError::Cancelled)));
}
