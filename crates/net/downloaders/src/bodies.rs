use crate::stats::{PeerStats, RequestType};
use futures_util::{stream::FuturesUnordered, StreamExt};
use rbtp_interfaces::{
    consensus::ConsensusError,
    p2p::{
        bodies::BodiesClient,
        download::DownloadClient,
        error::{DownloadError, DownloadResult},
    },
};
use rbtp_primitives::{BlockBody, SealedBlock, SealedHeader, B256};
use rbtp_trie::root::{calculate_ommers_hash, calculate_transaction_root};
use std::{collections::VecDeque, sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Smallest body batch a peer is asked for.
const MIN_BODIES_BATCH: usize = 16;

/// Largest body batch a peer is asked for.
const MAX_BODIES_BATCH: usize = 128;

/// Parallel body requests in flight.
const MAX_CONCURRENT_REQUESTS: usize = 8;

/// Attempts per block before the download gives up.
const MAX_ROUNDS: usize = 64;

/// Downloads block bodies for validated headers, delivering complete
/// blocks in ascending order.
#[derive(Debug)]
pub struct BodiesSync<B> {
    client: Arc<B>,
    stats: Arc<PeerStats>,
}

impl<B: BodiesClient> BodiesSync<B> {
    /// Creates the bodies downloader.
    pub fn new(client: Arc<B>, stats: Arc<PeerStats>) -> Self {
        Self { client, stats }
    }

    /// Fetches the bodies for `headers`, validating every body against its
    /// header commitments. Headers without transactions and ommers are
    /// completed locally.
    pub async fn download(
        &self,
        headers: &[SealedHeader],
        cancel: &CancellationToken,
    ) -> DownloadResult<Vec<SealedBlock>> {
        let mut blocks: Vec<Option<SealedBlock>> = headers
            .iter()
            .map(|header| {
                header.is_empty().then(|| SealedBlock {
                    header: header.clone(),
                    body: Vec::new(),
                    ommers: Vec::new(),
                })
            })
            .collect();

        // indices of headers that still need a body
        let mut missing: VecDeque<usize> =
            (0..headers.len()).filter(|index| blocks[*index].is_none()).collect();

        let mut rounds = 0usize;
        while !missing.is_empty() {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled)
            }
            rounds += 1;
            if rounds > MAX_ROUNDS {
                return Err(DownloadError::EmptyResponse)
            }

            let concurrency =
                self.client.num_connected_peers().clamp(1, MAX_CONCURRENT_REQUESTS);
            let mut requests = FuturesUnordered::new();
            for _ in 0..concurrency {
                if missing.is_empty() {
                    break
                }
                let batch: Vec<usize> = missing
                    .drain(..missing.len().min(MAX_BODIES_BATCH))
                    .collect();
                let hashes: Vec<B256> =
                    batch.iter().map(|index| headers[*index].hash()).collect();
                let client = Arc::clone(&self.client);
                requests.push(async move {
                    let started = Instant::now();
                    let result = client.get_block_bodies(hashes).await;
                    (batch, result, started.elapsed())
                });
            }

            while let Some((batch, result, elapsed)) = requests.next().await {
                match result {
                    Ok(response) => {
                        let (peer, bodies) = response.split();
                        self.stats.record(peer, RequestType::Bodies, bodies.len(), elapsed);
                        let leftover =
                            self.assign(headers, &mut blocks, &batch, bodies, peer)?;
                        missing.extend(leftover);
                    }
                    Err(err) => {
                        trace!(target: "downloaders::bodies", %err, "Bodies request failed");
                        missing.extend(batch);
                    }
                }
            }
        }

        Ok(blocks.into_iter().map(|block| block.expect("all assigned")).collect())
    }

    /// Matches returned bodies to their headers by the roots they commit
    /// to; peers answer with the subset they have, so position alone is not
    /// authoritative. Unmatched indices are handed back for rescheduling.
    fn assign(
        &self,
        headers: &[SealedHeader],
        blocks: &mut [Option<SealedBlock>],
        batch: &[usize],
        bodies: Vec<BlockBody>,
        peer: rbtp_primitives::PeerId,
    ) -> DownloadResult<Vec<usize>> {
        let mut pending: Vec<usize> = batch.to_vec();

        for body in bodies {
            let transactions_root = calculate_transaction_root(&body.transactions);
            let ommers_hash = calculate_ommers_hash(&body.ommers);

            let matched = pending.iter().position(|&index| {
                let header = &headers[index];
                header.transactions_root == transactions_root &&
                    header.ommers_hash == ommers_hash
            });
            match matched {
                Some(position) => {
                    let index = pending.swap_remove(position);
                    blocks[index] = Some(SealedBlock {
                        header: headers[index].clone(),
                        body: body.transactions,
                        ommers: body.ommers,
                    });
                }
                None => {
                    // a body nobody asked for does not validate against any
                    // requested header
                    self.client.report_bad_message(peer);
                    return Err(DownloadError::BodyValidation {
                        hash: headers[batch[0]].hash(),
                        error: ConsensusError::BodyTransactionRootDiff(
                            (transactions_root, headers[batch[0]].transactions_root).into(),
                        ),
                    })
                }
            }
        }

        Ok(pending)
    }
}
