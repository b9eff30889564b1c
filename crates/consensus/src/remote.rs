//! The remote-miner work queue: external miners poll for work packages and
//! submit solutions over the `get_work`/`submit_work`/`submit_hashrate`
//! surface.

use crate::{algorithm, epoch, seed_hash, Btpash};
use parking_lot::Mutex;
use rbtp_interfaces::consensus::Consensus;
use rbtp_primitives::{Block, B256, B64, U256};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Work packages older than this many blocks are dropped as stale.
const STALE_WINDOW: u64 = 7;

/// Hashrate reports expire after this long.
const HASHRATE_TTL: Duration = Duration::from_secs(10 * 60);

/// One unit of remote work, as handed to `get_work` pollers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPackage {
    /// Hash of the header sans seal, the miner's search input.
    pub seal_hash: B256,
    /// Seed of the epoch the block falls into.
    pub seed_hash: B256,
    /// The boundary the result digest must not exceed.
    pub target: U256,
    /// The block number being mined.
    pub number: u64,
}

#[derive(Debug, Default)]
struct RemoteState {
    /// The most recently announced work.
    current: Option<WorkPackage>,
    /// Pending blocks by seal hash, awaiting a remote solution.
    works: HashMap<B256, Block>,
    /// Reported hashrates by miner id.
    hashrates: HashMap<B256, (u64, Instant)>,
}

/// The remote sealer facade.
///
/// The mining loop pushes fresh pending blocks in via
/// [`RemoteSealer::notify_work`]; solved blocks come out of the results
/// receiver returned by [`RemoteSealer::new`].
#[derive(Debug)]
pub struct RemoteSealer {
    engine: Arc<Btpash>,
    state: Mutex<RemoteState>,
    results: mpsc::UnboundedSender<Block>,
}

impl RemoteSealer {
    /// Creates the sealer and the channel sealed blocks are delivered on.
    pub fn new(engine: Arc<Btpash>) -> (Self, mpsc::UnboundedReceiver<Block>) {
        let (results, results_rx) = mpsc::unbounded_channel();
        (Self { engine, state: Mutex::new(RemoteState::default()), results }, results_rx)
    }

    /// Announces a fresh pending block as the current work unit and prunes
    /// packages that fell out of the staleness window.
    pub fn notify_work(&self, block: Block) {
        let seal_hash = block.header.seal_hash();
        let number = block.header.number;
        let package = WorkPackage {
            seal_hash,
            seed_hash: seed_hash(epoch(number)),
            target: algorithm::target(block.header.difficulty),
            number,
        };

        let mut state = self.state.lock();
        state.works.insert(seal_hash, block);
        state.works.retain(|_, work| work.header.number + STALE_WINDOW > number);
        state.current = Some(package);
    }

    /// The current work package, if mining is active.
    pub fn get_work(&self) -> Option<WorkPackage> {
        self.state.lock().current.clone()
    }

    /// Accepts a remote solution. The full seal check runs before the block
    /// is released; `true` means the solution was accepted.
    pub fn submit_work(&self, nonce: u64, seal_hash: B256, mix_hash: B256) -> bool {
        let block = {
            let state = self.state.lock();
            match state.works.get(&seal_hash) {
                Some(block) => block.clone(),
                None => {
                    warn!(target: "consensus::remote", %seal_hash, "Work submitted for unknown or stale package");
                    return false
                }
            }
        };

        let mut solved = block;
        solved.header.nonce = B64::from(nonce);
        solved.header.mix_hash = mix_hash;
        let sealed = solved.seal_slow();

        if self.engine.validate_seal(&sealed.header).is_err() {
            warn!(target: "consensus::remote", %seal_hash, nonce, "Invalid remote seal");
            return false
        }

        debug!(target: "consensus::remote", number = sealed.number, "Remote seal accepted");
        self.state.lock().works.remove(&seal_hash);
        self.results.send(sealed.unseal()).is_ok()
    }

    /// Records a remote miner's reported hashrate.
    pub fn submit_hashrate(&self, id: B256, rate: u64) {
        self.state.lock().hashrates.insert(id, (rate, Instant::now()));
    }

    /// Sum of all non-expired reported hashrates.
    pub fn hashrate(&self) -> u64 {
        let mut state = self.state.lock();
        state.hashrates.retain(|_, (_, seen)| seen.elapsed() < HASHRATE_TTL);
        state.hashrates.values().map(|(rate, _)| rate).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbtp_chainspec::DEV;
    use rbtp_primitives::Header;

    fn pending_block(number: u64) -> Block {
        Block {
            header: Header {
                number,
                gas_limit: 5000,
                timestamp: number * 13 + 1,
                difficulty: U256::from(1u64),
                ..Default::default()
            },
            body: vec![],
            ommers: vec![],
        }
    }

    #[test]
    fn work_flow_roundtrip() {
        let engine = Arc::new(Btpash::new(Arc::clone(&*DEV)));
        let (sealer, mut results) = RemoteSealer::new(Arc::clone(&engine));
        assert!(sealer.get_work().is_none());

        let block = pending_block(1);
        sealer.notify_work(block.clone());
        let work = sealer.get_work().unwrap();
        assert_eq!(work.number, 1);
        assert_eq!(work.seed_hash, B256::ZERO);

        // unit difficulty: any nonce works, but the mix digest must be real
        let cache = engine.cache(0);
        let (mix, _) = cache.hashimoto(work.seal_hash, 7);
        assert!(sealer.submit_work(7, work.seal_hash, mix));
        let solved = results.try_recv().unwrap();
        assert_eq!(solved.header.number, 1);

        // the package is consumed
        assert!(!sealer.submit_work(7, work.seal_hash, mix));
    }

    #[test]
    fn bad_solutions_are_rejected() {
        let engine = Arc::new(Btpash::new(Arc::clone(&*DEV)));
        let (sealer, _results) = RemoteSealer::new(engine);
        sealer.notify_work(pending_block(1));
        let work = sealer.get_work().unwrap();
        // a fabricated mix digest fails re-verification
        assert!(!sealer.submit_work(7, work.seal_hash, B256::repeat_byte(5)));
    }

    #[test]
    fn stale_packages_are_pruned() {
        let engine = Arc::new(Btpash::new(Arc::clone(&*DEV)));
        let (sealer, _results) = RemoteSealer::new(Arc::clone(&engine));

        let old = pending_block(1);
        let old_seal_hash = old.header.seal_hash();
        sealer.notify_work(old);
        sealer.notify_work(pending_block(20));

        let cache = engine.cache(0);
        let (mix, _) = cache.hashimoto(old_seal_hash, 3);
        assert!(!sealer.submit_work(3, old_seal_hash, mix));
    }

    #[test]
    fn hashrate_aggregates_reports() {
        let engine = Arc::new(Btpash::new(Arc::clone(&*DEV)));
        let (sealer, _results) = RemoteSealer::new(engine);
        sealer.submit_hashrate(B256::repeat_byte(1), 100);
        sealer.submit_hashrate(B256::repeat_byte(2), 50);
        // a re-report replaces the old figure
        sealer.submit_hashrate(B256::repeat_byte(1), 70);
        assert_eq!(sealer.hashrate(), 120);
    }
}
