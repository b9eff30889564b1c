use rbtp_primitives::PeerId;
use std::fmt::Debug;

/// Common behavior every download client exposes to the downloaders.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait DownloadClient: Send + Sync + Debug {
    /// Penalizes the peer for an unusable or malicious response.
    fn report_bad_message(&self, peer_id: PeerId);

    /// Number of peers currently usable for requests, driving the
    /// concurrency the downloaders schedule with.
    fn num_connected_peers(&self) -> usize;
}
