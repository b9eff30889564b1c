//! Component assembly and the ordered shutdown path.

use crate::config::NodeConfig;
use rbtp_blockchain::{BlockChain, TransferExecutor};
use rbtp_chainspec::ChainSpec;
use rbtp_consensus::Btpash;
use rbtp_db::{ChainStorage, FileStore, Freezer};
use rbtp_downloaders::Downloader;
use rbtp_interfaces::provider::{AccountProvider, BlockProvider, HeaderProvider};
use rbtp_network::{BlockFetcher, FetchClient, NetworkConfig, NetworkManager, PeerEvent};
use rbtp_primitives::B256;
use rbtp_trie::TrieDb;
use rbtp_txpool::TxPool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A fully wired node over the given chain spec.
pub struct Node {
    /// The configuration the node runs with.
    pub config: NodeConfig,
    /// The canonical chain.
    pub chain: Arc<BlockChain<FileStore>>,
    /// The transaction pool.
    pub pool: Arc<TxPool>,
    /// The protocol manager.
    pub network: Arc<NetworkManager>,
    /// The bulk synchronizer.
    pub downloader: Arc<Downloader<Btpash, FetchClient, BlockChain<FileStore>>>,
    /// Cancels the running sync on shutdown or head change.
    pub sync_cancel: CancellationToken,
    /// Transport events flow in here.
    pub network_events: mpsc::UnboundedSender<PeerEvent>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("head", &self.chain.head().hash).finish_non_exhaustive()
    }
}

impl Node {
    /// Builds and starts every component: storage → chain → pool → network
    /// → fetcher → downloader, leaves first.
    pub fn launch(config: NodeConfig, spec: Arc<ChainSpec>) -> Result<Self, rbtp_interfaces::Error> {
        // the hot tier lives in the datadir and replays its log at open,
        // so a restarted process resumes at the persisted head
        let store = FileStore::open(config.datadir.join("chaindata"))?;
        let freezer = Freezer::open(config.datadir.join("ancients")).ok();
        let storage = Arc::new(ChainStorage::open(store, freezer)?);

        let consensus = Arc::new(Btpash::new(Arc::clone(&spec)));
        let executor = Arc::new(TransferExecutor::new(Arc::clone(&spec)));
        let chain = Arc::new(BlockChain::new(
            Arc::clone(&storage),
            Arc::clone(&spec),
            Arc::clone(&consensus) as _,
            executor as _,
            config.tie_break,
        )?);
        info!(target: "node", head = %chain.head().hash, "Chain ready");

        let head = chain
            .storage()
            .sealed_header(chain.head().hash)?
            .expect("head header exists");
        let pool = Arc::new(TxPool::new(
            config.txpool.clone(),
            Arc::clone(&spec),
            Arc::clone(&chain) as Arc<dyn AccountProvider>,
            head,
        ));

        let network_config =
            NetworkConfig { network_id: config.network_id, max_peers: config.max_peers };
        let state_nodes: Arc<dyn TrieDb> = Arc::clone(&storage) as Arc<dyn TrieDb>;
        let (events_tx, events_rx) = mpsc::unbounded_channel::<PeerEvent>();
        let (fetcher_tx, fetcher_rx) = mpsc::unbounded_channel();

        let network = Arc::new(NetworkManager::new(
            network_config,
            Arc::clone(&spec),
            Arc::clone(&chain) as Arc<dyn BlockProvider>,
            state_nodes,
            Arc::clone(&pool),
            fetcher_tx,
        ));

        let fetcher = BlockFetcher::new(
            network.fetch_client(),
            Arc::clone(&chain),
            Arc::clone(&chain) as Arc<dyn BlockProvider>,
            fetcher_rx,
        );

        let client = Arc::new(network.fetch_client());
        let downloader = Arc::new(Downloader::new(
            config.sync_mode,
            Arc::clone(&consensus),
            client,
            Arc::clone(&chain),
            Arc::clone(&chain) as Arc<dyn BlockProvider>,
            Arc::clone(&storage) as Arc<dyn TrieDb>,
        ));

        let sync_cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(fetcher.run()));
        tasks.push(tokio::spawn(Arc::clone(&network).run(events_rx)));

        // pool maintenance and block propagation follow the canonical head
        {
            let pool = Arc::clone(&pool);
            let chain = Arc::clone(&chain);
            let network = Arc::clone(&network);
            let mut heads = chain.subscribe_head();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = heads.recv().await {
                    pool.on_new_head(&*chain, event.block.header.clone());
                    // full block to √N peers, a hash announce to the rest
                    network.propagate_block(&event.block, chain.head().total_difficulty);
                }
            }));
        }

        // admitted transactions propagate to peers
        {
            let network = Arc::clone(&network);
            let mut txs = pool.subscribe();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = txs.recv().await {
                    network.propagate_transactions(&event.transactions);
                }
            }));
        }

        // chase the heaviest advertised chain
        {
            let network = Arc::clone(&network);
            let chain_for_sync = Arc::clone(&chain);
            let downloader = Arc::clone(&downloader);
            let cancel = sync_cancel.clone();
            tasks.push(tokio::spawn(async move {
                let mut poll = tokio::time::interval(std::time::Duration::from_secs(10));
                loop {
                    poll.tick().await;
                    if cancel.is_cancelled() {
                        return
                    }
                    let Some((peer, head, td)) = network.peers().best_peer() else { continue };
                    if td <= chain_for_sync.head().total_difficulty {
                        continue
                    }
                    info!(target: "node", %peer, %head, "Peer advertises heavier chain, syncing");
                    if let Err(err) = downloader.run(head, cancel.child_token()).await {
                        tracing::debug!(target: "node", %err, "Sync attempt failed");
                    }
                }
            }));
        }

        Ok(Self {
            config,
            chain,
            pool,
            network,
            downloader,
            sync_cancel,
            network_events: events_tx,
            tasks,
        })
    }

    /// Starts a bulk sync towards `target`.
    pub async fn sync_to(&self, target: B256) -> Result<(), rbtp_interfaces::Error> {
        let cancel = self.sync_cancel.child_token();
        if let Err(err) = self.downloader.run(target, cancel).await {
            tracing::warn!(target: "node", %err, "Sync run ended with error");
        }
        Ok(())
    }

    /// Orderly shutdown: stop accepting peers, cancel sync, park the pool
    /// journal, then let the chain and store close as the tasks drain.
    pub async fn shutdown(self) {
        info!(target: "node", "Shutting down");
        // closing the event channel stops the manager loop, which stops
        // accepting peers
        drop(self.network_events);
        self.sync_cancel.cancel();
        // rebasing on the current head rotates the journal to disk
        let head = self
            .chain
            .storage()
            .sealed_header(self.chain.head().hash)
            .ok()
            .flatten()
            .expect("head header exists");
        self.pool.on_new_head(&*self.chain, head);

        for task in self.tasks {
            task.abort();
        }

        // fold the store log down to a snapshot before the process exits
        if let Err(err) = self.chain.storage().db().compact() {
            tracing::warn!(target: "node", %err, "Store compaction failed during shutdown");
        }
    }
}
