use crate::peers::PeerSet;
use parking_lot::Mutex;
use rbtp_interfaces::p2p::{
    bodies::BodiesClient,
    download::DownloadClient,
    error::{PeerRequestResult, RequestError},
    headers::{HeadersClient, HeadersRequest},
    priority::Priority,
    receipts::ReceiptsClient,
    state::NodeDataClient,
};
use rbtp_primitives::{BlockBody, Bytes, Header, PeerId, ReceiptWithBloom, WithPeerId, B256};
use rbtp_wire::{BtpMessage, GetBlockBodies, GetBlockHeaders, GetNodeData, GetReceipts};
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
    time::{Duration, Instant},
};
use tokio::sync::oneshot;
use tracing::trace;

/// How long a peer may take to answer a request.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The kinds of in-flight requests a peer can serve one-at-a-time each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RequestKind {
    Headers,
    Bodies,
    NodeData,
    Receipts,
}

pub(crate) enum ResponseSender {
    Headers(oneshot::Sender<PeerRequestResult<Vec<Header>>>),
    Bodies(oneshot::Sender<PeerRequestResult<Vec<BlockBody>>>),
    NodeData(oneshot::Sender<PeerRequestResult<Vec<Bytes>>>),
    Receipts(oneshot::Sender<PeerRequestResult<Vec<Vec<ReceiptWithBloom>>>>),
}

struct Pending {
    sender: ResponseSender,
    deadline: Instant,
}

/// Turns p2p client requests into wire messages and correlates the typed
/// responses back, one in-flight request per `(peer, kind)`.
#[derive(Clone)]
pub struct FetchClient {
    peers: Arc<PeerSet>,
    inflight: Arc<Mutex<HashMap<(PeerId, RequestKind), Pending>>>,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("inflight", &self.inflight.lock().len())
            .finish_non_exhaustive()
    }
}

impl FetchClient {
    pub(crate) fn new(peers: Arc<PeerSet>) -> Self {
        Self { peers, inflight: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Picks an idle peer for `kind` and queues `message` to it.
    fn dispatch(&self, kind: RequestKind, message: BtpMessage, sender: ResponseSender) -> Result<PeerId, RequestError> {
        let mut inflight = self.inflight.lock();
        let peer_id = self
            .peers
            .peer_ids()
            .into_iter()
            .find(|id| !inflight.contains_key(&(*id, kind)))
            .ok_or(RequestError::NotConnected)?;

        let sent = self
            .peers
            .with_peer(&peer_id, |peer| peer.send(message))
            .unwrap_or(false);
        if !sent {
            return Err(RequestError::ConnectionDropped)
        }

        trace!(target: "network::fetch", %peer_id, ?kind, "Dispatched request");
        inflight
            .insert((peer_id, kind), Pending { sender, deadline: Instant::now() + REQUEST_TIMEOUT });
        Ok(peer_id)
    }

    /// Queues `message` to one specific peer, as the announce fetcher does
    /// when it retries individual announcers.
    fn dispatch_to(
        &self,
        peer_id: PeerId,
        kind: RequestKind,
        message: BtpMessage,
        sender: ResponseSender,
    ) -> Result<(), RequestError> {
        let mut inflight = self.inflight.lock();
        if inflight.contains_key(&(peer_id, kind)) {
            return Err(RequestError::NotConnected)
        }
        let sent =
            self.peers.with_peer(&peer_id, |peer| peer.send(message)).unwrap_or(false);
        if !sent {
            return Err(RequestError::ConnectionDropped)
        }
        inflight
            .insert((peer_id, kind), Pending { sender, deadline: Instant::now() + REQUEST_TIMEOUT });
        Ok(())
    }

    /// A headers request directed at one peer.
    pub(crate) fn headers_from(
        &self,
        peer_id: PeerId,
        request: HeadersRequest,
    ) -> ResponseFuture<Vec<Header>> {
        let (tx, rx) = oneshot::channel();
        let message = BtpMessage::GetBlockHeaders(GetBlockHeaders {
            start_block: request.start,
            limit: request.limit,
            skip: request.skip,
            direction: request.direction,
        });
        match self.dispatch_to(peer_id, RequestKind::Headers, message, ResponseSender::Headers(tx))
        {
            Ok(()) => ResponseFuture::waiting(rx),
            Err(error) => ResponseFuture::failed(error),
        }
    }

    /// A bodies request directed at one peer.
    pub(crate) fn bodies_from(
        &self,
        peer_id: PeerId,
        hashes: Vec<B256>,
    ) -> ResponseFuture<Vec<BlockBody>> {
        let (tx, rx) = oneshot::channel();
        let message = BtpMessage::GetBlockBodies(GetBlockBodies(hashes));
        match self.dispatch_to(peer_id, RequestKind::Bodies, message, ResponseSender::Bodies(tx)) {
            Ok(()) => ResponseFuture::waiting(rx),
            Err(error) => ResponseFuture::failed(error),
        }
    }

    /// Routes a response message to its pending request. Returns `false`
    /// for unsolicited responses, which count against the peer.
    pub(crate) fn on_response(&self, peer_id: PeerId, message: &BtpMessage) -> bool {
        let kind = match message {
            BtpMessage::BlockHeaders(_) => RequestKind::Headers,
            BtpMessage::BlockBodies(_) => RequestKind::Bodies,
            BtpMessage::NodeData(_) => RequestKind::NodeData,
            BtpMessage::Receipts(_) => RequestKind::Receipts,
            _ => return false,
        };
        let Some(pending) = self.inflight.lock().remove(&(peer_id, kind)) else { return false };

        match (pending.sender, message) {
            (ResponseSender::Headers(tx), BtpMessage::BlockHeaders(headers)) => {
                let _ = tx.send(Ok(WithPeerId::new(peer_id, headers.0.clone())));
            }
            (ResponseSender::Bodies(tx), BtpMessage::BlockBodies(bodies)) => {
                let _ = tx.send(Ok(WithPeerId::new(peer_id, bodies.0.clone())));
            }
            (ResponseSender::NodeData(tx), BtpMessage::NodeData(nodes)) => {
                let _ = tx.send(Ok(WithPeerId::new(peer_id, nodes.0.clone())));
            }
            (ResponseSender::Receipts(tx), BtpMessage::Receipts(receipts)) => {
                let _ = tx.send(Ok(WithPeerId::new(peer_id, receipts.0.clone())));
            }
            _ => return false,
        }
        true
    }

    /// Expires overdue requests, striking the unresponsive peers.
    pub(crate) fn tick(&self, now: Instant) {
        let expired: Vec<((PeerId, RequestKind), Pending)> = {
            let mut inflight = self.inflight.lock();
            let keys: Vec<_> = inflight
                .iter()
                .filter(|(_, pending)| pending.deadline <= now)
                .map(|(key, _)| *key)
                .collect();
            keys.into_iter().filter_map(|key| inflight.remove(&key).map(|p| (key, p))).collect()
        };

        for ((peer_id, kind), pending) in expired {
            trace!(target: "network::fetch", %peer_id, ?kind, "Request timed out");
            metrics::counter!("network.request_timeouts").increment(1);
            match pending.sender {
                ResponseSender::Headers(tx) => drop(tx.send(Err(RequestError::Timeout))),
                ResponseSender::Bodies(tx) => drop(tx.send(Err(RequestError::Timeout))),
                ResponseSender::NodeData(tx) => drop(tx.send(Err(RequestError::Timeout))),
                ResponseSender::Receipts(tx) => drop(tx.send(Err(RequestError::Timeout))),
            }
            self.peers.strike(&peer_id);
        }
    }
}

/// A typed response future handed out by the [`FetchClient`].
#[derive(Debug)]
pub struct ResponseFuture<T> {
    state: ResponseState<T>,
}

#[derive(Debug)]
enum ResponseState<T> {
    Waiting(oneshot::Receiver<PeerRequestResult<T>>),
    Failed(Option<RequestError>),
}

impl<T> ResponseFuture<T> {
    fn waiting(rx: oneshot::Receiver<PeerRequestResult<T>>) -> Self {
        Self { state: ResponseState::Waiting(rx) }
    }

    fn failed(error: RequestError) -> Self {
        Self { state: ResponseState::Failed(Some(error)) }
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = PeerRequestResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            ResponseState::Waiting(rx) => {
                let result = ready!(Pin::new(rx).poll(cx));
                Poll::Ready(result.unwrap_or(Err(RequestError::ChannelClosed)))
            }
            ResponseState::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(RequestError::ChannelClosed)))
            }
        }
    }
}

impl DownloadClient for FetchClient {
    fn report_bad_message(&self, peer_id: PeerId) {
        self.peers.strike(&peer_id);
    }

    fn num_connected_peers(&self) -> usize {
        self.peers.len()
    }
}

impl HeadersClient for FetchClient {
    type Output = ResponseFuture<Vec<Header>>;

    fn get_headers_with_priority(
        &self,
        request: HeadersRequest,
        _priority: Priority,
    ) -> Self::Output {
        let (tx, rx) = oneshot::channel();
        let message = BtpMessage::GetBlockHeaders(GetBlockHeaders {
            start_block: request.start,
            limit: request.limit,
            skip: request.skip,
            direction: request.direction,
        });
        match self.dispatch(RequestKind::Headers, message, ResponseSender::Headers(tx)) {
            Ok(_) => ResponseFuture::waiting(rx),
            Err(error) => ResponseFuture::failed(error),
        }
    }
}

impl BodiesClient for FetchClient {
    type Output = ResponseFuture<Vec<BlockBody>>;

    fn get_block_bodies_with_priority(
        &self,
        hashes: Vec<B256>,
        _priority: Priority,
    ) -> Self::Output {
        let (tx, rx) = oneshot::channel();
        let message = BtpMessage::GetBlockBodies(GetBlockBodies(hashes));
        match self.dispatch(RequestKind::Bodies, message, ResponseSender::Bodies(tx)) {
            Ok(_) => ResponseFuture::waiting(rx),
            Err(error) => ResponseFuture::failed(error),
        }
    }
}

impl NodeDataClient for FetchClient {
    type Output = ResponseFuture<Vec<Bytes>>;

    fn get_node_data(&self, hashes: Vec<B256>) -> Self::Output {
        let (tx, rx) = oneshot::channel();
        let message = BtpMessage::GetNodeData(GetNodeData(hashes));
        match self.dispatch(RequestKind::NodeData, message, ResponseSender::NodeData(tx)) {
            Ok(_) => ResponseFuture::waiting(rx),
            Err(error) => ResponseFuture::failed(error),
        }
    }
}

impl ReceiptsClient for FetchClient {
    type Output = ResponseFuture<Vec<Vec<ReceiptWithBloom>>>;

    fn get_receipts(&self, hashes: Vec<B256>) -> Self::Output {
        let (tx, rx) = oneshot::channel();
        let message = BtpMessage::GetReceipts(GetReceipts(hashes));
        match self.dispatch(RequestKind::Receipts, message, ResponseSender::Receipts(tx)) {
            Ok(_) => ResponseFuture::waiting(rx),
            Err(error) => ResponseFuture::failed(error),
        }
    }
}
