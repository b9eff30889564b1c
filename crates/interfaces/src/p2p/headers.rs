use crate::p2p::{download::DownloadClient, error::PeerRequestResult, priority::Priority};
use futures::Future;
use rbtp_primitives::{BlockHashOrNumber, Header, HeadersDirection};

/// A headers request sent to a peer.
///
/// `skip` asks the peer to leave gaps between consecutive headers, which is
/// how the skeleton phase samples every Nth header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadersRequest {
    /// The block to start from.
    pub start: BlockHashOrNumber,
    /// Maximum number of headers in the response.
    pub limit: u64,
    /// Number of headers to skip between each returned header.
    pub skip: u64,
    /// Walk direction from `start`.
    pub direction: HeadersDirection,
}

impl HeadersRequest {
    /// A contiguous rising request.
    pub fn rising(start: impl Into<BlockHashOrNumber>, limit: u64) -> Self {
        Self { start: start.into(), limit, skip: 0, direction: HeadersDirection::Rising }
    }

    /// A contiguous falling request.
    pub fn falling(start: impl Into<BlockHashOrNumber>, limit: u64) -> Self {
        Self { start: start.into(), limit, skip: 0, direction: HeadersDirection::Falling }
    }
}

/// The block headers download client.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait HeadersClient: DownloadClient {
    /// The future the request resolves into.
    type Output: Future<Output = PeerRequestResult<Vec<Header>>> + Send + Sync + Unpin;

    /// Sends the headers request with the given priority.
    fn get_headers_with_priority(
        &self,
        request: HeadersRequest,
        priority: Priority,
    ) -> Self::Output;

    /// Sends the headers request at normal priority.
    fn get_headers(&self, request: HeadersRequest) -> Self::Output {
        self.get_headers_with_priority(request, Priority::Normal)
    }
}
