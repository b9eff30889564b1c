use crate::{
    fetch::FetchClient,
    fetcher::FetcherCommand,
    peers::{Peer, PeerSet, Session},
};
use parking_lot::Mutex;
use rbtp_chainspec::ChainSpec;
use rbtp_interfaces::provider::BlockProvider;
use rbtp_primitives::{
    BlockHashOrNumber, Head, HeadersDirection, PeerId, SealedBlock, TransactionSignedEcRecovered,
    B256, U256,
};
use rbtp_trie::TrieDb;
use rbtp_txpool::TxPool;
use rbtp_wire::{
    BlockBodies, BlockHashNumber, BlockHeaders, BtpMessage, BtpVersion, GetBlockHeaders,
    NewBlock, NewBlockHashes, NodeData, Receipts, Status, Transactions,
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Most headers served per request.
const MAX_HEADERS_SERVE: u64 = 1024;

/// Most bodies served per request.
const MAX_BODIES_SERVE: usize = 256;

/// Most state nodes served per request.
const MAX_NODE_DATA_SERVE: usize = 1024;

/// Most receipt lists served per request.
const MAX_RECEIPTS_SERVE: usize = 256;

/// Network-facing configuration of the protocol manager.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// The network id exchanged in handshakes.
    pub network_id: u64,
    /// Connection ceiling; further sessions are refused.
    pub max_peers: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { network_id: 1, max_peers: 50 }
    }
}

/// Events the transport layer feeds into the manager.
#[derive(Debug)]
pub enum PeerEvent {
    /// A framed, encrypted session finished its transport handshake.
    SessionEstablished {
        /// The remote's node id.
        peer_id: PeerId,
        /// The negotiated protocol version.
        version: BtpVersion,
        /// The outbound message queue of the session.
        session: Session,
    },
    /// The session closed.
    SessionClosed {
        /// The remote's node id.
        peer_id: PeerId,
    },
    /// A protocol message arrived.
    Message {
        /// The sending peer.
        peer_id: PeerId,
        /// The decoded message.
        message: BtpMessage,
    },
}

/// Why a peer was rejected at the application handshake.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Network ids differ.
    #[error("network id mismatch: theirs {theirs}, ours {ours}")]
    NetworkId {
        /// The remote network id.
        theirs: u64,
        /// The local network id.
        ours: u64,
    },
    /// Genesis hashes differ.
    #[error("genesis mismatch")]
    Genesis,
    /// The fork id failed validation.
    #[error(transparent)]
    ForkId(#[from] rbtp_chainspec::ValidationError),
    /// The peer ceiling is reached.
    #[error("too many peers")]
    TooManyPeers,
}

/// The protocol manager: peer registry, message dispatch and propagation
/// policy. Bridges the network transport to the pool, the fetcher and the
/// sync layer.
pub struct NetworkManager {
    config: NetworkConfig,
    spec: Arc<ChainSpec>,
    provider: Arc<dyn BlockProvider>,
    /// Content-addressed node store for serving `GetNodeData`.
    state_nodes: Arc<dyn TrieDb>,
    pool: Arc<TxPool>,
    peers: Arc<PeerSet>,
    fetch: FetchClient,
    fetcher_tx: mpsc::UnboundedSender<FetcherCommand>,
    /// Sessions that completed transport setup but not yet the `Status`
    /// exchange.
    pending_handshakes: Mutex<HashMap<PeerId, (BtpVersion, Session)>>,
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager").field("peers", &self.peers.len()).finish_non_exhaustive()
    }
}

impl NetworkManager {
    /// Assembles the manager. The returned [`FetchClient`] serves the
    /// downloaders; fetcher commands drain into `fetcher_tx`.
    pub fn new(
        config: NetworkConfig,
        spec: Arc<ChainSpec>,
        provider: Arc<dyn BlockProvider>,
        state_nodes: Arc<dyn TrieDb>,
        pool: Arc<TxPool>,
        fetcher_tx: mpsc::UnboundedSender<FetcherCommand>,
    ) -> Self {
        let peers = PeerSet::new();
        let fetch = FetchClient::new(Arc::clone(&peers));
        Self {
            config,
            spec,
            provider,
            state_nodes,
            pool,
            peers,
            fetch,
            fetcher_tx,
            pending_handshakes: Mutex::new(HashMap::new()),
        }
    }

    /// The peer registry.
    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    /// The request/response client used by the downloaders.
    pub fn fetch_client(&self) -> FetchClient {
        self.fetch.clone()
    }

    /// The local `Status` at the current head.
    pub fn local_status(&self, version: BtpVersion) -> Status {
        let head = self.local_head();
        Status {
            version: version.into(),
            network_id: self.config.network_id,
            total_difficulty: head.total_difficulty,
            head: head.hash,
            genesis: self.spec.genesis_hash(),
            fork_id: version.has_fork_id().then(|| self.spec.fork_id(&head)),
        }
    }

    fn local_head(&self) -> Head {
        match self.provider.chain_info() {
            Ok(info) => Head {
                number: info.best_number,
                hash: info.best_hash,
                difficulty: U256::ZERO,
                total_difficulty: info.total_difficulty,
                timestamp: 0,
            },
            Err(_) => Head::default(),
        }
    }

    /// Drives one event through the dispatch table.
    pub fn handle_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::SessionEstablished { peer_id, version, session } => {
                self.on_session_established(peer_id, version, session)
            }
            PeerEvent::SessionClosed { peer_id } => {
                self.pending_handshakes.lock().remove(&peer_id);
                self.peers.remove(&peer_id);
            }
            PeerEvent::Message { peer_id, message } => self.on_message(peer_id, message),
        }
    }

    /// Expires overdue requests. The run loop calls this on a coarse
    /// interval.
    pub fn on_tick(&self) {
        self.fetch.tick(Instant::now());
    }

    /// Consumes transport events until the channel closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => return,
                },
                _ = interval.tick() => self.on_tick(),
            }
        }
    }

    fn on_session_established(&self, peer_id: PeerId, version: BtpVersion, session: Session) {
        if self.peers.len() + self.pending_handshakes.lock().len() >= self.config.max_peers {
            debug!(target: "network", %peer_id, "Rejecting session: too many peers");
            return
        }
        // the Status exchange opens every session
        session.send(BtpMessage::Status(self.local_status(version)));
        self.pending_handshakes.lock().insert(peer_id, (version, session));
    }

    fn on_message(&self, peer_id: PeerId, message: BtpMessage) {
        // the first message on a fresh session must be the status
        if let Some((version, session)) = self.pending_handshakes.lock().remove(&peer_id) {
            match message {
                BtpMessage::Status(status) => {
                    match self.validate_status(&status) {
                        Ok(()) => {
                            let peer = Peer::new(
                                session,
                                version,
                                status.head,
                                status.total_difficulty,
                            );
                            self.peers.insert(peer_id, peer);
                        }
                        Err(err) => {
                            debug!(target: "network", %peer_id, %err, "Handshake rejected");
                            metrics::counter!("network.handshake_failures").increment(1);
                        }
                    }
                }
                _ => {
                    debug!(target: "network", %peer_id, "Peer spoke before handshake");
                }
            }
            return
        }

        if !self.peers.contains(&peer_id) {
            trace!(target: "network", %peer_id, "Message from unknown peer");
            return
        }

        match message {
            BtpMessage::Status(_) => {
                // a second status is a protocol violation
                self.peers.strike(&peer_id);
            }
            BtpMessage::NewBlockHashes(NewBlockHashes(announces)) => {
                for BlockHashNumber { hash, number } in announces {
                    self.peers.with_peer(&peer_id, |peer| peer.mark_block(hash));
                    let _ = self.fetcher_tx.send(FetcherCommand::Announced {
                        peer: peer_id,
                        hash,
                        number,
                    });
                }
            }
            BtpMessage::NewBlock(new_block) => {
                let NewBlock { block, total_difficulty } = *new_block;
                let block = block.seal_slow();
                self.peers.with_peer(&peer_id, |peer| {
                    peer.mark_block(block.hash());
                    peer.update_head(block.hash(), total_difficulty);
                });
                let _ =
                    self.fetcher_tx.send(FetcherCommand::Block { peer: peer_id, block });
            }
            BtpMessage::Transactions(Transactions(txs)) => {
                self.peers.with_peer(&peer_id, |peer| {
                    for tx in &txs {
                        peer.mark_tx(tx.hash());
                    }
                });
                let outcomes = self.pool.add_transactions(txs, false);
                let invalid = outcomes
                    .iter()
                    .filter(|outcome| {
                        matches!(outcome, Err(rbtp_txpool::PoolError::InvalidSender))
                    })
                    .count();
                if invalid > 0 {
                    self.peers.strike(&peer_id);
                }
            }
            BtpMessage::GetBlockHeaders(request) => {
                let headers = self.serve_headers(request);
                self.respond(peer_id, BtpMessage::BlockHeaders(BlockHeaders(headers)));
            }
            BtpMessage::GetBlockBodies(request) => {
                let bodies = request
                    .0
                    .into_iter()
                    .take(MAX_BODIES_SERVE)
                    .filter_map(|hash| self.provider.block_body(hash).ok().flatten())
                    .collect();
                self.respond(peer_id, BtpMessage::BlockBodies(BlockBodies(bodies)));
            }
            BtpMessage::GetNodeData(request) => {
                let nodes = request
                    .0
                    .into_iter()
                    .take(MAX_NODE_DATA_SERVE)
                    .filter_map(|hash| self.state_nodes.node(hash).map(Into::into))
                    .collect();
                self.respond(peer_id, BtpMessage::NodeData(NodeData(nodes)));
            }
            BtpMessage::GetReceipts(request) => {
                let receipts = request
                    .0
                    .into_iter()
                    .take(MAX_RECEIPTS_SERVE)
                    .map(|hash| {
                        self.provider
                            .receipts(hash)
                            .ok()
                            .flatten()
                            .unwrap_or_default()
                            .into_iter()
                            .map(|receipt| receipt.with_bloom())
                            .collect()
                    })
                    .collect();
                self.respond(peer_id, BtpMessage::Receipts(Receipts(receipts)));
            }
            response @ (BtpMessage::BlockHeaders(_) |
            BtpMessage::BlockBodies(_) |
            BtpMessage::NodeData(_) |
            BtpMessage::Receipts(_)) => {
                if !self.fetch.on_response(peer_id, &response) {
                    trace!(target: "network", %peer_id, "Unsolicited response");
                    self.peers.strike(&peer_id);
                }
            }
        }
    }

    fn validate_status(&self, status: &Status) -> Result<(), HandshakeError> {
        if status.network_id != self.config.network_id {
            return Err(HandshakeError::NetworkId {
                theirs: status.network_id,
                ours: self.config.network_id,
            })
        }
        if status.genesis != self.spec.genesis_hash() {
            return Err(HandshakeError::Genesis)
        }
        if let Some(fork_id) = status.fork_id {
            let filter = self.spec.fork_filter(self.local_head());
            filter.validate(fork_id)?;
        }
        Ok(())
    }

    fn respond(&self, peer_id: PeerId, message: BtpMessage) {
        self.peers.with_peer(&peer_id, |peer| peer.send(message));
    }

    fn serve_headers(&self, request: GetBlockHeaders) -> Vec<rbtp_primitives::Header> {
        let limit = request.limit.min(MAX_HEADERS_SERVE);
        let mut headers = Vec::new();

        let mut number = match request.start_block {
            BlockHashOrNumber::Hash(hash) => {
                match self.provider.header(hash).ok().flatten() {
                    Some(header) => header.number,
                    None => return headers,
                }
            }
            BlockHashOrNumber::Number(number) => number,
        };

        let step = request.skip + 1;
        for _ in 0..limit {
            let Some(header) = self.provider.header_by_number(number).ok().flatten() else {
                break
            };
            headers.push(header);
            match request.direction {
                HeadersDirection::Rising => number += step,
                HeadersDirection::Falling => match number.checked_sub(step) {
                    Some(next) => number = next,
                    None => break,
                },
            }
        }
        headers
    }

    // === propagation policy ===

    /// Propagates a freshly imported block: the full block to `√peers`,
    /// a hash announcement to the rest.
    pub fn propagate_block(&self, block: &SealedBlock, total_difficulty: U256) {
        let hash = block.hash();
        let unaware: Vec<PeerId> = {
            let mut ids = Vec::new();
            self.peers.for_each(|peer_id, peer| {
                if !peer.knows_block(&hash) {
                    ids.push(*peer_id);
                }
            });
            ids
        };
        if unaware.is_empty() {
            return
        }

        let direct = (unaware.len() as f64).sqrt().ceil() as usize;
        let full_block = NewBlock {
            block: block.clone().unseal(),
            total_difficulty,
        };
        let announce = NewBlockHashes(vec![BlockHashNumber { hash, number: block.number }]);

        for (index, peer_id) in unaware.iter().enumerate() {
            self.peers.with_peer(peer_id, |peer| {
                peer.mark_block(hash);
                if index < direct {
                    peer.send(BtpMessage::NewBlock(Box::new(full_block.clone())))
                } else {
                    peer.send(BtpMessage::NewBlockHashes(announce.clone()))
                }
            });
        }
        trace!(target: "network", %hash, direct, announced = unaware.len() - direct, "Propagated block");
    }

    /// Sends transactions to every peer not already known to have them,
    /// preserving per-sender nonce order.
    pub fn propagate_transactions(&self, txs: &[Arc<TransactionSignedEcRecovered>]) {
        let mut by_peer: HashMap<PeerId, Vec<rbtp_primitives::TransactionSigned>> =
            HashMap::new();
        self.peers.for_each(|peer_id, peer| {
            for tx in txs {
                if !peer.knows_tx(&tx.hash()) {
                    peer.mark_tx(tx.hash());
                    by_peer.entry(*peer_id).or_default().push((**tx).clone().into_signed());
                }
            }
        });
        for (peer_id, txs) in by_peer {
            self.respond(peer_id, BtpMessage::Transactions(Transactions(txs)));
        }
    }
}
