use lru::LruCache;
use parking_lot::RwLock;
use rbtp_primitives::{BlockHash, PeerId, TxHash, B256, U256};
use rbtp_wire::{BtpMessage, BtpVersion};
use std::{collections::HashMap, fmt, num::NonZeroUsize, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Remembered transactions per peer.
const KNOWN_TXS: usize = 32_768;

/// Remembered block hashes per peer.
const KNOWN_BLOCKS: usize = 1_024;

/// Timeout strikes and invalid responses a peer survives.
const MAX_STRIKES: u32 = 5;

/// The outbound half of a peer session.
///
/// The transport below drains this queue into its framed connection; the
/// manager never blocks on a slow peer.
#[derive(Debug, Clone)]
pub struct Session {
    /// Messages queued towards the remote end.
    pub outgoing: mpsc::UnboundedSender<BtpMessage>,
}

impl Session {
    /// Queues a message; a closed session is reported as `false`.
    pub fn send(&self, message: BtpMessage) -> bool {
        self.outgoing.send(message).is_ok()
    }
}

/// Everything the node tracks about one connected peer.
pub struct Peer {
    session: Session,
    /// Negotiated protocol version.
    pub version: BtpVersion,
    /// The peer's advertised head hash.
    pub head: BlockHash,
    /// The peer's advertised total difficulty.
    pub total_difficulty: U256,
    known_txs: LruCache<TxHash, ()>,
    known_blocks: LruCache<B256, ()>,
    strikes: u32,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("version", &self.version)
            .field("head", &self.head)
            .field("strikes", &self.strikes)
            .finish_non_exhaustive()
    }
}

impl Peer {
    pub(crate) fn new(
        session: Session,
        version: BtpVersion,
        head: BlockHash,
        total_difficulty: U256,
    ) -> Self {
        Self {
            session,
            version,
            head,
            total_difficulty,
            known_txs: LruCache::new(NonZeroUsize::new(KNOWN_TXS).expect("non-zero")),
            known_blocks: LruCache::new(NonZeroUsize::new(KNOWN_BLOCKS).expect("non-zero")),
            strikes: 0,
        }
    }

    /// Queues a message to this peer.
    pub fn send(&self, message: BtpMessage) -> bool {
        self.session.send(message)
    }

    /// Whether the peer is known to have the transaction.
    pub fn knows_tx(&self, hash: &TxHash) -> bool {
        self.known_txs.contains(hash)
    }

    /// Whether the peer is known to have the block.
    pub fn knows_block(&self, hash: &B256) -> bool {
        self.known_blocks.contains(hash)
    }

    /// Marks a transaction as known to the peer.
    pub fn mark_tx(&mut self, hash: TxHash) {
        self.known_txs.put(hash, ());
    }

    /// Marks a block as known to the peer.
    pub fn mark_block(&mut self, hash: B256) {
        self.known_blocks.put(hash, ());
    }

    /// Moves the tracked head forward.
    pub fn update_head(&mut self, head: BlockHash, total_difficulty: U256) {
        if total_difficulty > self.total_difficulty {
            self.head = head;
            self.total_difficulty = total_difficulty;
        }
    }
}

/// The registry of connected peers.
///
/// Guarded by a reader-writer lock so broadcast snapshots never block the
/// dispatch path.
#[derive(Debug, Default)]
pub struct PeerSet {
    peers: RwLock<HashMap<PeerId, Peer>>,
}

impl PeerSet {
    /// Creates an empty set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a freshly handshaked peer.
    pub fn insert(&self, peer_id: PeerId, peer: Peer) {
        debug!(target: "network", %peer_id, version = %peer.version, "Peer registered");
        self.peers.write().insert(peer_id, peer);
        metrics::gauge!("network.peers").set(self.len() as f64);
    }

    /// Drops a peer.
    pub fn remove(&self, peer_id: &PeerId) -> Option<Peer> {
        let removed = self.peers.write().remove(peer_id);
        if removed.is_some() {
            debug!(target: "network", %peer_id, "Peer removed");
            metrics::gauge!("network.peers").set(self.len() as f64);
        }
        removed
    }

    /// Number of connected peers.
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Whether no peer is connected.
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Whether the peer is connected.
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.read().contains_key(peer_id)
    }

    /// All connected peer ids.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.read().keys().copied().collect()
    }

    /// The peer advertising the heaviest chain, with its head and total
    /// difficulty. This is who bulk sync chases.
    pub fn best_peer(&self) -> Option<(PeerId, BlockHash, U256)> {
        self.peers
            .read()
            .iter()
            .max_by_key(|(_, peer)| peer.total_difficulty)
            .map(|(id, peer)| (*id, peer.head, peer.total_difficulty))
    }

    /// Runs `op` on the peer, if connected.
    pub fn with_peer<R>(&self, peer_id: &PeerId, op: impl FnOnce(&mut Peer) -> R) -> Option<R> {
        self.peers.write().get_mut(peer_id).map(op)
    }

    /// Runs `op` over a consistent snapshot of all peers.
    pub fn for_each(&self, mut op: impl FnMut(&PeerId, &mut Peer)) {
        for (peer_id, peer) in self.peers.write().iter_mut() {
            op(peer_id, peer);
        }
    }

    /// Adds a strike; returns `true` when the peer crossed the limit and
    /// was dropped.
    pub fn strike(&self, peer_id: &PeerId) -> bool {
        let mut peers = self.peers.write();
        let Some(peer) = peers.get_mut(peer_id) else { return false };
        peer.strikes += 1;
        trace!(target: "network", %peer_id, strikes = peer.strikes, "Peer strike");
        if peer.strikes > MAX_STRIKES {
            peers.remove(peer_id);
            drop(peers);
            debug!(target: "network", %peer_id, "Dropped misbehaving peer");
            metrics::counter!("network.dropped_peers").increment(1);
            metrics::gauge!("network.peers").set(self.len() as f64);
            true
        } else {
            false
        }
    }

    /// The recorded strike count, mostly for tests and diagnostics.
    pub fn strikes(&self, peer_id: &PeerId) -> Option<u32> {
        self.peers.read().get(peer_id).map(|peer| peer.strikes)
    }
}
