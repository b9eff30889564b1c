use crate::stats::{PeerStats, RequestType};
use futures_util::{stream::FuturesUnordered, StreamExt};
use rbtp_interfaces::{
    consensus::Consensus,
    p2p::{
        download::DownloadClient,
        error::{DownloadError, DownloadResult},
        headers::{HeadersClient, HeadersRequest},
        priority::Priority,
    },
};
use rbtp_primitives::{BlockNumber, HeadersDirection, SealedHeader};
use std::{sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Distance between two skeleton pivots.
pub(crate) const SKELETON_SPAN: u64 = 192;

/// Most pivots requested from the master peer at once.
const MAX_SKELETON_PIVOTS: u64 = 128;

/// Every Nth header gets a full seal check during sync; linkage,
/// difficulty and timestamps are checked on all of them.
const SEAL_SAMPLE_RATE: u64 = 100;

/// Headers-first downloader: a skeleton from one master peer, gaps filled
/// in parallel by whoever is idle.
#[derive(Debug)]
pub struct HeadersSync<C, H> {
    consensus: Arc<C>,
    client: Arc<H>,
    stats: Arc<PeerStats>,
}

impl<C: Consensus, H: HeadersClient> HeadersSync<C, H> {
    /// Creates the header downloader.
    pub fn new(consensus: Arc<C>, client: Arc<H>, stats: Arc<PeerStats>) -> Self {
        Self { consensus, client, stats }
    }

    /// Downloads and validates the ascending headers `(anchor, target]`.
    ///
    /// `anchor` must be the validated local head of the range. A master
    /// peer serving a broken skeleton is penalized and the download
    /// restarts from the last validated anchor.
    pub async fn download(
        &self,
        anchor: SealedHeader,
        target: BlockNumber,
        cancel: &CancellationToken,
    ) -> DownloadResult<Vec<SealedHeader>> {
        let mut validated: Vec<SealedHeader> = Vec::new();
        let mut anchor = anchor;

        while anchor.number < target {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled)
            }
            let span = self.download_span(&anchor, target).await?;
            if span.is_empty() {
                break
            }
            anchor = span.last().expect("non-empty").clone();
            validated.extend(span);
        }
        debug!(target: "downloaders::headers", count = validated.len(), "Downloaded headers");
        Ok(validated)
    }

    /// Downloads one skeleton-spanned section after `anchor`.
    async fn download_span(
        &self,
        anchor: &SealedHeader,
        target: BlockNumber,
    ) -> DownloadResult<Vec<SealedHeader>> {
        let remaining = target - anchor.number;
        if remaining < SKELETON_SPAN {
            // close to the tip, a single contiguous request suffices
            return self.fill_gap(anchor, remaining, None).await
        }

        // the skeleton comes from a single master peer
        let pivot_count = (remaining / SKELETON_SPAN).min(MAX_SKELETON_PIVOTS);
        let request = HeadersRequest {
            start: (anchor.number + SKELETON_SPAN).into(),
            limit: pivot_count,
            skip: SKELETON_SPAN - 1,
            direction: HeadersDirection::Rising,
        };
        let started = Instant::now();
        let (master, pivots) = self
            .client
            .get_headers_with_priority(request, Priority::High)
            .await?
            .split();
        self.stats.record(master, RequestType::Headers, pivots.len(), started.elapsed());
        if pivots.is_empty() {
            return Err(DownloadError::EmptyResponse)
        }

        // a master that bends the skeleton restarts the sync
        for (index, pivot) in pivots.iter().enumerate() {
            let expected = anchor.number + (index as u64 + 1) * SKELETON_SPAN;
            if pivot.number != expected {
                self.client.report_bad_message(master);
                return Err(DownloadError::MismatchedBlockNumber(
                    (pivot.number, expected).into(),
                ))
            }
        }
        let pivots: Vec<SealedHeader> =
            pivots.into_iter().map(|header| header.seal_slow()).collect();

        // fill the gaps in parallel from idle peers
        let mut fillers = FuturesUnordered::new();
        let mut previous = anchor.clone();
        for (index, pivot) in pivots.iter().enumerate() {
            let gap_anchor = std::mem::replace(&mut previous, pivot.clone());
            let edge = pivot.clone();
            fillers.push(async move {
                let segment = self.fill_gap(&gap_anchor, SKELETON_SPAN, Some(edge)).await;
                (index, segment)
            });
        }

        let mut segments: Vec<Option<Vec<SealedHeader>>> = vec![None; pivots.len()];
        while let Some((index, segment)) = fillers.next().await {
            segments[index] = Some(segment?);
        }
        drop(fillers);

        let mut span = Vec::with_capacity(remaining.min(SKELETON_SPAN * pivot_count) as usize);
        for segment in segments.into_iter().flatten() {
            span.extend(segment);
        }
        Ok(span)
    }

    /// Downloads `(anchor, anchor + limit]` contiguously and validates the
    /// linkage. With an `edge` pivot given, the segment must end exactly on
    /// it.
    async fn fill_gap(
        &self,
        anchor: &SealedHeader,
        limit: u64,
        edge: Option<SealedHeader>,
    ) -> DownloadResult<Vec<SealedHeader>> {
        if limit == 0 {
            return Ok(Vec::new())
        }
        let request = HeadersRequest::rising(anchor.number + 1, limit);
        let started = Instant::now();
        let (peer, headers) = self.client.get_headers(request).await?.split();
        self.stats.record(peer, RequestType::Headers, headers.len(), started.elapsed());
        if headers.is_empty() {
            return Err(DownloadError::EmptyResponse)
        }

        let headers: Vec<SealedHeader> =
            headers.into_iter().map(|header| header.seal_slow()).collect();

        if let Some(edge) = &edge {
            match headers.last() {
                Some(last) if last.hash() == edge.hash() => {}
                _ => {
                    self.client.report_bad_message(peer);
                    return Err(DownloadError::BrokenLinkage { block_number: edge.number })
                }
            }
        }

        // standalone bounds plus parent linkage, difficulty and timestamps
        let mut previous = anchor;
        for header in &headers {
            if let Err(error) = self
                .consensus
                .validate_header(header)
                .and_then(|()| self.consensus.validate_header_against_parent(header, previous))
            {
                self.client.report_bad_message(peer);
                return Err(DownloadError::HeaderValidation { hash: header.hash(), error })
            }
            if header.number % SEAL_SAMPLE_RATE == 0 {
                if let Err(error) = self.consensus.validate_seal(header) {
                    self.client.report_bad_message(peer);
                    return Err(DownloadError::HeaderValidation { hash: header.hash(), error })
                }
            }
            previous = header;
        }

        trace!(target: "downloaders::headers", from = anchor.number + 1, count = headers.len(), "Filled header gap");
        Ok(headers)
    }
}
