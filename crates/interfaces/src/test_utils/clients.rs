use crate::p2p::{
    bodies::BodiesClient,
    download::DownloadClient,
    error::PeerRequestResult,
    headers::{HeadersClient, HeadersRequest},
    priority::Priority,
    receipts::ReceiptsClient,
    state::NodeDataClient,
};
use futures::future::{ready, Ready};
use parking_lot::Mutex;
use rbtp_primitives::{
    BlockBody, BlockHashOrNumber, Bytes, Header, PeerId, ReceiptWithBloom, WithPeerId, B256,
};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

/// A [`HeadersClient`] answering from a canned ascending chain.
#[derive(Debug, Default)]
pub struct TestHeadersClient {
    headers: Mutex<Vec<Header>>,
    request_attempts: AtomicU64,
    penalized: Mutex<Vec<PeerId>>,
    peer_id: PeerId,
}

impl TestHeadersClient {
    /// Appends headers to the canned chain.
    pub fn extend(&self, headers: impl IntoIterator<Item = Header>) {
        let mut canned = self.headers.lock();
        canned.extend(headers);
        canned.sort_by_key(|h| h.number);
    }

    /// Number of requests served so far.
    pub fn request_attempts(&self) -> u64 {
        self.request_attempts.load(Ordering::SeqCst)
    }

    /// The peers penalized through this client.
    pub fn penalized(&self) -> Vec<PeerId> {
        self.penalized.lock().clone()
    }
}

impl DownloadClient for TestHeadersClient {
    fn report_bad_message(&self, peer_id: PeerId) {
        self.penalized.lock().push(peer_id);
    }

    fn num_connected_peers(&self) -> usize {
        1
    }
}

impl HeadersClient for TestHeadersClient {
    type Output = Ready<PeerRequestResult<Vec<Header>>>;

    fn get_headers_with_priority(
        &self,
        request: HeadersRequest,
        _priority: Priority,
    ) -> Self::Output {
        self.request_attempts.fetch_add(1, Ordering::SeqCst);
        let canned = self.headers.lock();

        let start = match request.start {
            BlockHashOrNumber::Number(number) => Some(number),
            BlockHashOrNumber::Hash(hash) => {
                canned.iter().find(|h| h.hash_slow() == hash).map(|h| h.number)
            }
        };

        let mut result = Vec::new();
        if let Some(start) = start {
            let step = request.skip + 1;
            let mut number = start;
            for _ in 0..request.limit {
                let Some(header) = canned.iter().find(|h| h.number == number) else { break };
                result.push(header.clone());
                number = if request.direction.is_falling() {
                    match number.checked_sub(step) {
                        Some(next) => next,
                        None => break,
                    }
                } else {
                    number + step
                };
            }
        }

        ready(Ok(WithPeerId::new(self.peer_id, result)))
    }
}

/// A [`BodiesClient`] answering from a canned hash→body map.
#[derive(Debug, Default)]
pub struct TestBodiesClient {
    bodies: Mutex<HashMap<B256, BlockBody>>,
    penalized: Mutex<Vec<PeerId>>,
    peer_id: PeerId,
}

impl TestBodiesClient {
    /// Inserts bodies keyed by their block hash.
    pub fn insert(&self, hash: B256, body: BlockBody) {
        self.bodies.lock().insert(hash, body);
    }

    /// The peers penalized through this client.
    pub fn penalized(&self) -> Vec<PeerId> {
        self.penalized.lock().clone()
    }
}

impl DownloadClient for TestBodiesClient {
    fn report_bad_message(&self, peer_id: PeerId) {
        self.penalized.lock().push(peer_id);
    }

    fn num_connected_peers(&self) -> usize {
        1
    }
}

impl BodiesClient for TestBodiesClient {
    type Output = Ready<PeerRequestResult<Vec<BlockBody>>>;

    fn get_block_bodies_with_priority(
        &self,
        hashes: Vec<B256>,
        _priority: Priority,
    ) -> Self::Output {
        let bodies = self.bodies.lock();
        // peers answer with what they have, preserving request order
        let result =
            hashes.iter().filter_map(|hash| bodies.get(hash).cloned()).collect::<Vec<_>>();
        ready(Ok(WithPeerId::new(self.peer_id, result)))
    }
}

/// A [`NodeDataClient`] answering from a canned content-addressed store.
#[derive(Debug, Default)]
pub struct TestNodeDataClient {
    nodes: Mutex<HashMap<B256, Vec<u8>>>,
    peer_id: PeerId,
}

impl TestNodeDataClient {
    /// Inserts a node blob under its hash.
    pub fn insert(&self, hash: B256, bytes: Vec<u8>) {
        self.nodes.lock().insert(hash, bytes);
    }
}

impl DownloadClient for TestNodeDataClient {
    fn report_bad_message(&self, _peer_id: PeerId) {}

    fn num_connected_peers(&self) -> usize {
        1
    }
}

impl NodeDataClient for TestNodeDataClient {
    type Output = Ready<PeerRequestResult<Vec<Bytes>>>;

    fn get_node_data(&self, hashes: Vec<B256>) -> Self::Output {
        let nodes = self.nodes.lock();
        let result = hashes
            .iter()
            .filter_map(|hash| nodes.get(hash).cloned().map(Bytes::from))
            .collect::<Vec<_>>();
        ready(Ok(WithPeerId::new(self.peer_id, result)))
    }
}

/// A [`ReceiptsClient`] answering from a canned hash→receipts map.
#[derive(Debug, Default)]
pub struct TestReceiptsClient {
    receipts: Mutex<HashMap<B256, Vec<ReceiptWithBloom>>>,
    peer_id: PeerId,
}

impl TestReceiptsClient {
    /// Inserts a block's receipts keyed by block hash.
    pub fn insert(&self, hash: B256, receipts: Vec<ReceiptWithBloom>) {
        self.receipts.lock().insert(hash, receipts);
    }
}

impl DownloadClient for TestReceiptsClient {
    fn report_bad_message(&self, _peer_id: PeerId) {}

    fn num_connected_peers(&self) -> usize {
        1
    }
}

impl ReceiptsClient for TestReceiptsClient {
    type Output = Ready<PeerRequestResult<Vec<Vec<ReceiptWithBloom>>>>;

    fn get_receipts(&self, hashes: Vec<B256>) -> Self::Output {
        let receipts = self.receipts.lock();
        let result =
            hashes.iter().map(|hash| receipts.get(hash).cloned().unwrap_or_default()).collect();
        ready(Ok(WithPeerId::new(self.peer_id, result)))
    }
}
