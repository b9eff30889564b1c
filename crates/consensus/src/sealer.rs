//! Local proof-of-work mining workers.

use crate::{algorithm, epoch, Btpash};
use rand::Rng;
use rbtp_primitives::{Block, SealedBlock, B64};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
};
use tracing::{debug, trace};

/// How many nonces a worker grinds between stop-flag checks.
const CHECK_INTERVAL: u64 = 1 << 10;

/// Spawns and supervises mining workers over the btpash engine.
#[derive(Debug, Clone)]
pub struct Sealer {
    engine: Arc<Btpash>,
    threads: usize,
}

impl Sealer {
    /// Creates a sealer running `threads` parallel workers.
    pub fn new(engine: Arc<Btpash>, threads: usize) -> Self {
        Self { engine, threads: threads.max(1) }
    }

    /// Starts mining `block`, whose header must already be prepared.
    ///
    /// Workers partition the nonce space from a random starting point; the
    /// first solution wins and stops the rest.
    pub fn seal(&self, block: Block) -> SealJob {
        let stop = Arc::new(AtomicBool::new(false));
        let (found_tx, found_rx) = mpsc::channel();

        let seal_hash = block.header.seal_hash();
        let difficulty = block.header.difficulty;
        let cache = self.engine.cache(epoch(block.header.number));

        let mut workers = Vec::with_capacity(self.threads);
        for worker in 0..self.threads {
            let stop = Arc::clone(&stop);
            let found = found_tx.clone();
            let cache = Arc::clone(&cache);
            let block = block.clone();
            let stride = self.threads as u64;
            let start: u64 = rand::thread_rng().gen();

            workers.push(thread::spawn(move || {
                let mut nonce = start.wrapping_add(worker as u64);
                let mut attempts = 0u64;
                trace!(target: "consensus::sealer", worker, start = nonce, "Started search");
                loop {
                    if attempts % CHECK_INTERVAL == 0 && stop.load(Ordering::Relaxed) {
                        return
                    }
                    attempts += 1;

                    let (mix, result) = cache.hashimoto(seal_hash, nonce);
                    if algorithm::meets_target(result, difficulty) {
                        let mut mined = block;
                        mined.header.nonce = B64::from(nonce);
                        mined.header.mix_hash = mix;
                        debug!(target: "consensus::sealer", worker, attempts, "Seal found");
                        stop.store(true, Ordering::Relaxed);
                        // the receiver may be gone if another worker won
                        let _ = found.send(mined.seal_slow());
                        return
                    }
                    nonce = nonce.wrapping_add(stride);
                }
            }));
        }

        SealJob { stop, found: found_rx, workers }
    }
}

/// A running seal search.
#[derive(Debug)]
pub struct SealJob {
    stop: Arc<AtomicBool>,
    found: mpsc::Receiver<SealedBlock>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl SealJob {
    /// Aborts the search; in-flight workers drain on their next check.
    pub fn abort(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Blocks until a solution is found or the job is aborted.
    pub fn wait(self) -> Option<SealedBlock> {
        let sealed = self.found.recv().ok();
        self.stop.store(true, Ordering::Relaxed);
        for worker in self.workers {
            let _ = worker.join();
        }
        sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbtp_chainspec::DEV;
    use rbtp_interfaces::consensus::Consensus;
    use rbtp_primitives::{Header, U256};

    #[test]
    fn mines_a_valid_seal_at_unit_difficulty() {
        let engine = Arc::new(Btpash::new(Arc::clone(&*DEV)));
        let header = Header {
            number: 1,
            gas_limit: 5000,
            timestamp: 13,
            // unit difficulty accepts the first attempt
            difficulty: U256::from(1u64),
            ..Default::default()
        };
        let block = Block { header, body: vec![], ommers: vec![] };

        let sealed = Sealer::new(Arc::clone(&engine), 2).seal(block).wait().expect("solution");
        engine.validate_seal(&sealed.header).unwrap();
    }

    #[test]
    fn abort_stops_the_search() {
        let engine = Arc::new(Btpash::new(Arc::clone(&*DEV)));
        let header = Header {
            number: 1,
            gas_limit: 5000,
            timestamp: 13,
            // effectively unminable
            difficulty: U256::MAX,
            ..Default::default()
        };
        let job = Sealer::new(engine, 1).seal(Block { header, body: vec![], ommers: vec![] });
        job.abort();
        assert!(job.wait().is_none());
    }
}
