use crate::p2p::{download::DownloadClient, error::PeerRequestResult, priority::Priority};
use futures::Future;
use rbtp_primitives::{BlockBody, B256};

/// The block bodies download client.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait BodiesClient: DownloadClient {
    /// The future the request resolves into.
    type Output: Future<Output = PeerRequestResult<Vec<BlockBody>>> + Send + Sync + Unpin;

    /// Fetches the bodies for the given block hashes with the given
    /// priority.
    fn get_block_bodies_with_priority(
        &self,
        hashes: Vec<B256>,
        priority: Priority,
    ) -> Self::Output;

    /// Fetches the bodies for the given block hashes.
    fn get_block_bodies(&self, hashes: Vec<B256>) -> Self::Output {
        self.get_block_bodies_with_priority(hashes, Priority::Normal)
    }
}
