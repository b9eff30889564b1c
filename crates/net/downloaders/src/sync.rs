use crate::{
    bodies::BodiesSync, headers::HeadersSync, mode::SyncMode, receipts::ReceiptsSync,
    state::StateSync, stats::PeerStats,
};
use rbtp_interfaces::{
    consensus::Consensus,
    p2p::{
        bodies::BodiesClient,
        download::DownloadClient,
        error::{DownloadError, DownloadResult},
        headers::{HeadersClient, HeadersRequest},
        receipts::ReceiptsClient,
        state::NodeDataClient,
    },
    provider::{BlockImport, BlockProvider, FastImport},
};
use rbtp_primitives::{BlockNumHash, SealedHeader, B256};
use rbtp_trie::TrieDb;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The fast-sync pivot sits this many blocks behind the target head.
pub const PIVOT_DISTANCE: u64 = 64;

/// Blocks handed to import per scheduling chunk.
const IMPORT_CHUNK: usize = 1024;

/// The outcome of a completed sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// The mode the sync ran in.
    pub mode: SyncMode,
    /// The head the sync aimed for.
    pub target: BlockNumHash,
    /// Blocks made canonical during the run.
    pub imported: u64,
}

/// The bulk synchronizer: drives headers, bodies, receipts and state
/// downloads and imports in ascending order.
pub struct Downloader<C, CL, I> {
    consensus: Arc<C>,
    client: Arc<CL>,
    importer: Arc<I>,
    provider: Arc<dyn BlockProvider>,
    state_store: Arc<dyn TrieDb>,
    mode: SyncMode,
    stats: Arc<PeerStats>,
}

impl<C, CL, I> std::fmt::Debug for Downloader<C, CL, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("state_store", &self.state_store)
            .field("mode", &self.mode)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<C, CL, I> Downloader<C, CL, I>
where
    C: Consensus + 'static,
    CL: HeadersClient + BodiesClient + ReceiptsClient + NodeDataClient + 'static,
    I: BlockImport + FastImport + 'static,
{
    /// Assembles a downloader for the given mode.
    pub fn new(
        mode: SyncMode,
        consensus: Arc<C>,
        client: Arc<CL>,
        importer: Arc<I>,
        provider: Arc<dyn BlockProvider>,
        state_store: Arc<dyn TrieDb>,
    ) -> Self {
        Self {
            consensus,
            client,
            importer,
            provider,
            state_store,
            mode,
            stats: Arc::new(PeerStats::default()),
        }
    }

    /// The per-peer health tracker, shared with callers for diagnostics.
    pub fn stats(&self) -> &Arc<PeerStats> {
        &self.stats
    }

    /// Synchronizes towards `target`, a head hash learned from a peer's
    /// status or announcement. Cancelling the token stops the run at the
    /// next scheduling boundary; in-flight replies are drained.
    pub async fn run(
        &self,
        target: B256,
        cancel: CancellationToken,
    ) -> DownloadResult<SyncOutcome> {
        // resolve the target header first; it anchors every later stage
        let (peer, tip) = self
            .client
            .get_headers(HeadersRequest::rising(target, 1))
            .await?
            .split();
        let Some(tip) = tip.into_iter().next() else { return Err(DownloadError::EmptyResponse) };
        let tip = tip.seal_slow();
        if tip.hash() != target {
            self.client.report_bad_message(peer);
            return Err(DownloadError::InvalidTip((tip.hash(), target).into()))
        }

        let local = self.provider.chain_info()?;
        if tip.number <= local.best_number {
            return Ok(SyncOutcome { mode: self.mode, target: tip.num_hash(), imported: 0 })
        }
        let anchor = self
            .provider
            .sealed_header(local.best_hash)?
            .ok_or(DownloadError::MissingHeader { block_number: local.best_number })?;

        info!(
            target: "downloaders",
            mode = %self.mode,
            from = local.best_number,
            to = tip.number,
            "Starting sync"
        );

        let headers = HeadersSync::new(
            Arc::clone(&self.consensus),
            Arc::clone(&self.client),
            Arc::clone(&self.stats),
        )
        .download(anchor, tip.number, &cancel)
        .await?;
        if headers.is_empty() {
            return Ok(SyncOutcome { mode: self.mode, target: tip.num_hash(), imported: 0 })
        }

        let imported = match self.mode {
            SyncMode::Light => {
                self.importer
                    .insert_headers(&headers)
                    .map_err(|err| DownloadError::Import(err.to_string()))?;
                headers.len() as u64
            }
            SyncMode::Full => self.import_full(&headers, &cancel).await?,
            SyncMode::Fast => self.import_fast(&headers, local.best_number, &cancel).await?,
        };

        info!(target: "downloaders", imported, to = tip.number, "Sync finished");
        Ok(SyncOutcome { mode: self.mode, target: tip.num_hash(), imported })
    }

    /// Full mode: bodies for everything, every transaction replayed.
    async fn import_full(
        &self,
        headers: &[SealedHeader],
        cancel: &CancellationToken,
    ) -> DownloadResult<u64> {
        let bodies = BodiesSync::new(Arc::clone(&self.client), Arc::clone(&self.stats));
        let mut imported = 0u64;
        for chunk in headers.chunks(IMPORT_CHUNK) {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled)
            }
            let blocks = bodies.download(chunk, cancel).await?;
            for block in blocks {
                self.importer
                    .insert_block(block)
                    .map_err(|err| DownloadError::Import(err.to_string()))?;
                imported += 1;
            }
        }
        Ok(imported)
    }

    /// Fast mode: headers and receipts to the pivot, pivot state by trie
    /// walk, full import from the pivot forward.
    async fn import_fast(
        &self,
        headers: &[SealedHeader],
        local_head: u64,
        cancel: &CancellationToken,
    ) -> DownloadResult<u64> {
        let target = headers.last().expect("checked non-empty").number;
        let pivot_number = target.saturating_sub(PIVOT_DISTANCE);
        if pivot_number <= local_head {
            // too close to the tip for a pivot, run everything through full
            return self.import_full(headers, cancel).await
        }

        let split = headers.iter().position(|h| h.number > pivot_number).unwrap_or(headers.len());
        let (pre_pivot, post_pivot) = headers.split_at(split);
        let pivot = pre_pivot.last().expect("pivot below target").clone();
        debug_assert_eq!(pivot.number, pivot_number);
        debug!(target: "downloaders", pivot = pivot_number, "Selected fast sync pivot");

        let bodies = BodiesSync::new(Arc::clone(&self.client), Arc::clone(&self.stats));
        let receipts_sync =
            ReceiptsSync::new(Arc::clone(&self.client), Arc::clone(&self.stats));

        let mut imported = 0u64;
        for chunk in pre_pivot.chunks(IMPORT_CHUNK) {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled)
            }
            let blocks = bodies.download(chunk, cancel).await?;
            let mut receipts = receipts_sync.download(chunk, cancel).await?;
            for block in blocks {
                let block_receipts = receipts.remove(&block.hash()).unwrap_or_default();
                self.importer
                    .insert_block_without_execution(block, block_receipts)
                    .map_err(|err| DownloadError::Import(err.to_string()))?;
                imported += 1;
            }
        }

        // the pivot block's entire state arrives by breadth-first walk
        let nodes = StateSync::new(Arc::clone(&self.client), Arc::clone(&self.state_store))
            .sync(pivot.state_root, cancel)
            .await?;
        debug!(target: "downloaders", nodes, "Pivot state downloaded");
        self.importer
            .commit_fast_sync_head(pivot.hash())
            .map_err(|err| DownloadError::Import(err.to_string()))?;

        // from the pivot on, every block is executed
        imported += self.import_full(post_pivot, cancel).await?;
        Ok(imported)
    }
}
