use crate::stats::{PeerStats, RequestType};
use rbtp_interfaces::{
    consensus::ConsensusError,
    p2p::{
        download::DownloadClient,
        error::{DownloadError, DownloadResult},
        receipts::ReceiptsClient,
    },
};
use rbtp_primitives::{ReceiptWithBloom, SealedHeader, B256, EMPTY_ROOT_HASH};
use rbtp_trie::root::calculate_receipt_root;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Largest receipts batch a peer is asked for.
const MAX_RECEIPTS_BATCH: usize = 128;

/// Attempts per block before the download gives up.
const MAX_ROUNDS: usize = 64;

/// Downloads receipt lists for validated headers, as fast sync needs below
/// the pivot.
#[derive(Debug)]
pub struct ReceiptsSync<R> {
    client: Arc<R>,
    stats: Arc<PeerStats>,
}

impl<R: ReceiptsClient> ReceiptsSync<R> {
    /// Creates the receipts downloader.
    pub fn new(client: Arc<R>, stats: Arc<PeerStats>) -> Self {
        Self { client, stats }
    }

    /// Fetches the receipts of every non-empty block among `headers`,
    /// validating each list against the header's receipts root. Returns a
    /// map keyed by block hash; empty blocks map to empty lists locally.
    pub async fn download(
        &self,
        headers: &[SealedHeader],
        cancel: &CancellationToken,
    ) -> DownloadResult<HashMap<B256, Vec<ReceiptWithBloom>>> {
        let mut results: HashMap<B256, Vec<ReceiptWithBloom>> = HashMap::new();
        let mut missing: Vec<&SealedHeader> = Vec::new();
        for header in headers {
            if header.receipts_root == EMPTY_ROOT_HASH {
                results.insert(header.hash(), Vec::new());
            } else {
                missing.push(header);
            }
        }

        let mut rounds = 0usize;
        while !missing.is_empty() {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled)
            }
            rounds += 1;
            if rounds > MAX_ROUNDS {
                return Err(DownloadError::EmptyResponse)
            }

            let batch: Vec<&SealedHeader> =
                missing.drain(..missing.len().min(MAX_RECEIPTS_BATCH)).collect();
            let hashes: Vec<B256> = batch.iter().map(|header| header.hash()).collect();

            let started = Instant::now();
            match self.client.get_receipts(hashes).await {
                Ok(response) => {
                    let (peer, lists) = response.split();
                    self.stats.record(peer, RequestType::Receipts, lists.len(), started.elapsed());

                    for (header, receipts) in batch.iter().zip(lists) {
                        if receipts.is_empty() {
                            // the peer does not have them; someone else will
                            missing.push(header);
                            continue
                        }
                        let receipts_root = calculate_receipt_root(&receipts);
                        if receipts_root != header.receipts_root {
                            self.client.report_bad_message(peer);
                            return Err(DownloadError::BodyValidation {
                                hash: header.hash(),
                                error: ConsensusError::BodyReceiptsRootDiff(
                                    (receipts_root, header.receipts_root).into(),
                                ),
                            })
                        }
                        results.insert(header.hash(), receipts);
                    }
                }
                Err(err) => {
                    trace!(target: "downloaders::receipts", %err, "Receipts request failed");
                    missing.extend(batch);
                }
            }
        }

        Ok(results)
    }
}
