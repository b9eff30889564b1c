use crate::p2p::{download::DownloadClient, error::PeerRequestResult};
use futures::Future;
use rbtp_primitives::{ReceiptWithBloom, B256};

/// The receipts download client, used by fast sync.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait ReceiptsClient: DownloadClient {
    /// The future the request resolves into.
    type Output: Future<Output = PeerRequestResult<Vec<Vec<ReceiptWithBloom>>>>
        + Send
        + Sync
        + Unpin;

    /// Fetches the receipt lists for the given block hashes.
    fn get_receipts(&self, hashes: Vec<B256>) -> Self::Output;
}
