//! The announce fetcher: opportunistically pulls single announced blocks
//! ahead of bulk sync, with per-peer quotas and retry across announcers.

use crate::fetch::FetchClient;
use futures_util::{stream::FuturesUnordered, StreamExt};
use rbtp_interfaces::{
    consensus::ConsensusError,
    p2p::{download::DownloadClient, error::RequestError, headers::HeadersRequest},
    provider::{BlockImport, BlockProvider},
    Error,
};
use rbtp_primitives::{PeerId, SealedBlock, B256};
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Announces a peer may have unresolved at any time.
const MAX_ANNOUNCES_PER_PEER: usize = 256;

/// Announced blocks are fetched this long after the announcement, giving
/// the full block a chance to arrive by propagation first.
const ARRIVE_DELAY: Duration = Duration::from_millis(500);

/// How far ahead of the local head an announce may point.
const MAX_FORWARD_DISTANCE: u64 = 32;

/// How far behind the local head an announce may point.
const MAX_BACKWARD_DISTANCE: u64 = 7;

/// Work fed to the fetcher by the protocol manager.
#[derive(Debug)]
pub enum FetcherCommand {
    /// A peer announced a block hash.
    Announced {
        /// The announcing peer.
        peer: PeerId,
        /// The announced hash.
        hash: B256,
        /// The announced height.
        number: u64,
    },
    /// A peer propagated a full block.
    Block {
        /// The sending peer.
        peer: PeerId,
        /// The propagated block.
        block: SealedBlock,
    },
}

/// Announce lifecycle: announced → fetching → imported or dropped.
#[derive(Debug)]
struct Announce {
    number: u64,
    announcers: Vec<PeerId>,
    attempt: usize,
    fetching: bool,
}

#[derive(Debug)]
enum FetchError {
    Request(RequestError),
    Empty,
    Mismatch,
}

struct FetchOutcome {
    hash: B256,
    peer: PeerId,
    result: Result<SealedBlock, FetchError>,
}

type FetchFut = Pin<Box<dyn Future<Output = FetchOutcome> + Send>>;

/// The announce-driven single block retriever.
pub struct BlockFetcher<I> {
    fetch: FetchClient,
    importer: Arc<I>,
    provider: Arc<dyn BlockProvider>,
    commands: mpsc::UnboundedReceiver<FetcherCommand>,
    announces: HashMap<B256, Announce>,
    peer_load: HashMap<PeerId, usize>,
    in_flight: FuturesUnordered<FetchFut>,
}

impl<I> std::fmt::Debug for BlockFetcher<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockFetcher")
            .field("announced", &self.announces.len())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl<I: BlockImport + 'static> BlockFetcher<I> {
    /// Creates the fetcher over the command channel the manager feeds.
    pub fn new(
        fetch: FetchClient,
        importer: Arc<I>,
        provider: Arc<dyn BlockProvider>,
        commands: mpsc::UnboundedReceiver<FetcherCommand>,
    ) -> Self {
        Self {
            fetch,
            importer,
            provider,
            commands,
            announces: HashMap::new(),
            peer_load: HashMap::new(),
            in_flight: FuturesUnordered::new(),
        }
    }

    /// Drives the fetcher until the command channel closes.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => return,
                },
                Some(outcome) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.on_outcome(outcome)
                }
            }
        }
    }

    fn on_command(&mut self, command: FetcherCommand) {
        match command {
            FetcherCommand::Announced { peer, hash, number } => {
                self.on_announce(peer, hash, number)
            }
            FetcherCommand::Block { peer, block } => self.import(peer, block),
        }
    }

    fn on_announce(&mut self, peer: PeerId, hash: B256, number: u64) {
        let load = self.peer_load.entry(peer).or_insert(0);
        if *load >= MAX_ANNOUNCES_PER_PEER {
            // an announce flood is a denial-of-service attempt
            debug!(target: "network::fetcher", %peer, "Announce quota exceeded");
            self.fetch.report_bad_message(peer);
            return
        }

        // out-of-range announces are noise while bulk sync catches up
        if let Ok(info) = self.provider.chain_info() {
            if number > info.best_number + MAX_FORWARD_DISTANCE ||
                number + MAX_BACKWARD_DISTANCE < info.best_number
            {
                trace!(target: "network::fetcher", %hash, number, "Announce out of range");
                return
            }
        }
        if self.provider.header(hash).ok().flatten().is_some() {
            return
        }

        let announce = self.announces.entry(hash).or_insert(Announce {
            number,
            announcers: Vec::new(),
            attempt: 0,
            fetching: false,
        });
        if announce.announcers.contains(&peer) {
            // duplicate announce, nothing new to track
            return
        }
        announce.announcers.push(peer);
        *self.peer_load.entry(peer).or_insert(0) += 1;
        if !announce.fetching {
            announce.fetching = true;
            let announcer = announce.announcers[0];
            let delay = ARRIVE_DELAY;
            self.spawn_fetch(hash, announcer, delay);
        }
    }

    fn spawn_fetch(&mut self, hash: B256, peer: PeerId, delay: Duration) {
        let fetch = self.fetch.clone();
        self.in_flight.push(Box::pin(async move {
            tokio::time::sleep(delay).await;

            let headers = match fetch.headers_from(peer, HeadersRequest::rising(hash, 1)).await {
                Ok(response) => response.into_data(),
                Err(err) => {
                    return FetchOutcome { hash, peer, result: Err(FetchError::Request(err)) }
                }
            };
            let Some(header) = headers.into_iter().next() else {
                return FetchOutcome { hash, peer, result: Err(FetchError::Empty) }
            };
            let header = header.seal_slow();
            if header.hash() != hash {
                return FetchOutcome { hash, peer, result: Err(FetchError::Mismatch) }
            }

            // empty blocks need no body roundtrip
            if header.is_empty() {
                let block =
                    SealedBlock { header, body: Vec::new(), ommers: Vec::new() };
                return FetchOutcome { hash, peer, result: Ok(block) }
            }

            match fetch.bodies_from(peer, vec![hash]).await {
                Ok(response) => match response.into_data().into_iter().next() {
                    Some(body) => FetchOutcome {
                        hash,
                        peer,
                        result: Ok(SealedBlock {
                            header,
                            body: body.transactions,
                            ommers: body.ommers,
                        }),
                    },
                    None => FetchOutcome { hash, peer, result: Err(FetchError::Empty) },
                },
                Err(err) => FetchOutcome { hash, peer, result: Err(FetchError::Request(err)) },
            }
        }));
    }

    fn on_outcome(&mut self, outcome: FetchOutcome) {
        match outcome.result {
            Ok(block) => {
                if let Some(announce) = self.announces.remove(&outcome.hash) {
                    self.release(&announce.announcers);
                }
                self.import(outcome.peer, block);
            }
            Err(err) => {
                trace!(target: "network::fetcher", hash = %outcome.hash, ?err, "Fetch attempt failed");
                if !matches!(err, FetchError::Request(RequestError::Timeout)) {
                    self.fetch.report_bad_message(outcome.peer);
                }
                // retry from the next announcer, if any is left
                let Some(announce) = self.announces.get_mut(&outcome.hash) else { return };
                announce.attempt += 1;
                if announce.attempt < announce.announcers.len() {
                    let next = announce.announcers[announce.attempt];
                    let hash = outcome.hash;
                    self.spawn_fetch(hash, next, Duration::ZERO);
                } else if let Some(announce) = self.announces.remove(&outcome.hash) {
                    self.release(&announce.announcers);
                    metrics::counter!("network.fetcher_dropped_announces").increment(1);
                }
            }
        }
    }

    fn release(&mut self, announcers: &[PeerId]) {
        for peer in announcers {
            if let Some(load) = self.peer_load.get_mut(peer) {
                *load = load.saturating_sub(1);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn handle_announce_for_tests(&mut self, peer: PeerId, hash: B256, number: u64) {
        self.on_announce(peer, hash, number)
    }

    fn import(&self, peer: PeerId, block: SealedBlock) {
        let hash = block.hash();
        match self.importer.insert_block(block) {
            Ok(outcome) => {
                trace!(target: "network::fetcher", %hash, ?outcome, "Imported fetched block");
                metrics::counter!("network.fetcher_imported_blocks").increment(1);
            }
            Err(Error::Consensus(ConsensusError::ParentUnknown { .. })) => {
                // the bulk downloader will catch up to it
                trace!(target: "network::fetcher", %hash, "Fetched block has unknown parent");
            }
            Err(err @ (Error::Consensus(_) | Error::Execution(_))) => {
                debug!(target: "network::fetcher", %hash, %err, "Peer delivered invalid block");
                self.fetch.report_bad_message(peer);
            }
            Err(err) => {
                debug!(target: "network::fetcher", %hash, %err, "Import failed");
            }
        }
    }
}
