use crate::p2p::{download::DownloadClient, error::PeerRequestResult};
use futures::Future;
use rbtp_primitives::{Bytes, B256};

/// The state trie node download client, used by fast sync to pull the pivot
/// state.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait NodeDataClient: DownloadClient {
    /// The future the request resolves into.
    type Output: Future<Output = PeerRequestResult<Vec<Bytes>>> + Send + Sync + Unpin;

    /// Fetches the raw trie nodes (or contract code blobs) for the given
    /// hashes.
    fn get_node_data(&self, hashes: Vec<B256>) -> Self::Output;
}
