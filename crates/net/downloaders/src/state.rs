use alloy_rlp::Decodable;
use rbtp_interfaces::p2p::{
    error::{DownloadError, DownloadResult},
    state::NodeDataClient,
};
use rbtp_primitives::{keccak256, TrieAccount, B256, EMPTY_ROOT_HASH, KECCAK_EMPTY};
use rbtp_trie::{decode_node_refs, TrieDb};
use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// State nodes requested per batch.
const NODES_PER_REQUEST: usize = 384;

/// Consecutive unproductive responses before the sync gives up.
const MAX_DRY_ROUNDS: usize = 32;

/// What a queued hash points at, deciding how its children are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    /// A node of the account trie; leaf values decode as accounts.
    AccountTrie,
    /// A node of a per-account storage trie; leaf values are opaque words.
    StorageTrie,
    /// A contract code blob; no children.
    Code,
}

/// Breadth-first download of the state trie at a fast-sync pivot root.
#[derive(Debug)]
pub struct StateSync<N> {
    client: Arc<N>,
    store: Arc<dyn TrieDb>,
}

impl<N: NodeDataClient> StateSync<N> {
    /// Creates the state downloader writing into `store`.
    pub fn new(client: Arc<N>, store: Arc<dyn TrieDb>) -> Self {
        Self { client, store }
    }

    /// Downloads every node reachable from `root`, returning how many were
    /// fetched. Nodes already present locally are traversed, not fetched.
    pub async fn sync(&self, root: B256, cancel: &CancellationToken) -> DownloadResult<usize> {
        if root == EMPTY_ROOT_HASH {
            return Ok(0)
        }

        let mut queue: VecDeque<(B256, NodeKind)> = VecDeque::new();
        let mut scheduled: HashSet<B256> = HashSet::new();
        queue.push_back((root, NodeKind::AccountTrie));
        scheduled.insert(root);

        let mut fetched = 0usize;
        let mut dry_rounds = 0usize;

        while !queue.is_empty() {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled)
            }

            // anything already in the store only needs local traversal
            let mut request: Vec<(B256, NodeKind)> = Vec::with_capacity(NODES_PER_REQUEST);
            while let Some((hash, kind)) = queue.pop_front() {
                if let Some(bytes) = self.store.node(hash) {
                    self.discover(&bytes, kind, &mut queue, &mut scheduled)?;
                    continue
                }
                request.push((hash, kind));
                if request.len() >= NODES_PER_REQUEST {
                    break
                }
            }
            if request.is_empty() {
                continue
            }

            let hashes: Vec<B256> = request.iter().map(|(hash, _)| *hash).collect();
            let (peer, blobs) = self.client.get_node_data(hashes).await?.split();

            let mut delivered: usize = 0;
            for blob in blobs {
                let hash = keccak256(&blob);
                let Some(position) = request.iter().position(|(want, _)| *want == hash) else {
                    // unrequested data; drop it and penalize
                    self.client.report_bad_message(peer);
                    return Err(DownloadError::StateNodeMismatch(
                        (hash, request[0].0).into(),
                    ))
                };
                let (_, kind) = request.swap_remove(position);
                self.store.insert_node(hash, blob.to_vec());
                self.discover(&blob, kind, &mut queue, &mut scheduled)?;
                fetched += 1;
                delivered += 1;
            }

            // whatever the peer skipped goes back on the queue
            for entry in request {
                queue.push_back(entry);
            }

            if delivered == 0 {
                dry_rounds += 1;
                if dry_rounds > MAX_DRY_ROUNDS {
                    return Err(DownloadError::EmptyResponse)
                }
            } else {
                dry_rounds = 0;
            }
            trace!(target: "downloaders::state", fetched, queued = queue.len(), "State sync progress");
        }

        debug!(target: "downloaders::state", fetched, %root, "State sync complete");
        Ok(fetched)
    }

    /// Enqueues the children a freshly stored node reveals.
    fn discover(
        &self,
        bytes: &[u8],
        kind: NodeKind,
        queue: &mut VecDeque<(B256, NodeKind)>,
        scheduled: &mut HashSet<B256>,
    ) -> DownloadResult<()> {
        if kind == NodeKind::Code {
            return Ok(())
        }

        let (children, values) = decode_node_refs(bytes).map_err(|_| {
            DownloadError::StateNodeMismatch((keccak256(bytes), keccak256(bytes)).into())
        })?;

        for child in children {
            if scheduled.insert(child) {
                queue.push_back((child, kind));
            }
        }

        if kind == NodeKind::AccountTrie {
            for value in values {
                // account leaves reveal the storage trie and the code blob
                let Ok(account) = TrieAccount::decode(&mut value.as_slice()) else { continue };
                if account.storage_root != EMPTY_ROOT_HASH &&
                    scheduled.insert(account.storage_root)
                {
                    queue.push_back((account.storage_root, NodeKind::StorageTrie));
                }
                if account.code_hash != KECCAK_EMPTY && scheduled.insert(account.code_hash) {
                    queue.push_back((account.code_hash, NodeKind::Code));
                }
            }
        }
        Ok(())
    }
}
