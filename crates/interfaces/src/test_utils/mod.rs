//! Shared test doubles for the subsystem seams.

mod clients;
mod consensus;

pub use clients::{TestBodiesClient, TestHeadersClient, TestNodeDataClient, TestReceiptsClient};
pub use consensus::TestConsensus;

/// Builds a child header on top of `parent`, sealing it with its hash.
pub fn child_header(parent: &rbtp_primitives::SealedHeader) -> rbtp_primitives::SealedHeader {
    let mut child = parent.header().clone();
    child.number += 1;
    child.parent_hash = parent.hash();
    child.timestamp = parent.timestamp + 13;
    child.seal_slow()
}

/// Builds an ascending chain of `len` sealed headers on top of `genesis`.
pub fn header_chain(
    genesis: rbtp_primitives::SealedHeader,
    len: usize,
) -> Vec<rbtp_primitives::SealedHeader> {
    let mut chain = Vec::with_capacity(len + 1);
    chain.push(genesis);
    for _ in 0..len {
        let child = child_header(chain.last().expect("non-empty"));
        chain.push(child);
    }
    chain
}
