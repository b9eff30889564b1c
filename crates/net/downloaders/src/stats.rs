use parking_lot::Mutex;
use rbtp_primitives::PeerId;
use std::{collections::HashMap, time::Duration};

/// The request classes tracked separately per peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Header span requests.
    Headers,
    /// Body batch requests.
    Bodies,
    /// Receipt batch requests.
    Receipts,
    /// State node batch requests.
    NodeData,
}

/// Exponentially weighted moving average.
#[derive(Debug, Clone, Copy)]
struct Ewma {
    value: f64,
}

impl Ewma {
    /// Smoothing factor: recent samples dominate but one outlier does not.
    const ALPHA: f64 = 0.1;

    fn sample(&mut self, value: f64) {
        if self.value == 0.0 {
            self.value = value;
        } else {
            self.value = Self::ALPHA * value + (1.0 - Self::ALPHA) * self.value;
        }
    }
}

#[derive(Debug, Default)]
struct PeerRecord {
    /// Items per second, per request class.
    throughput: HashMap<RequestType, Ewma>,
    /// Round-trip seconds, per request class.
    latency: HashMap<RequestType, Ewma>,
    timeouts: u32,
}

/// Per-peer health accounting used for work assignment.
#[derive(Debug, Default)]
pub struct PeerStats {
    records: Mutex<HashMap<PeerId, PeerRecord>>,
}

impl PeerStats {
    /// Records a served request: how many items arrived and how long the
    /// round trip took.
    pub fn record(&self, peer: PeerId, kind: RequestType, items: usize, elapsed: Duration) {
        let mut records = self.records.lock();
        let record = records.entry(peer).or_default();
        let secs = elapsed.as_secs_f64().max(1e-6);
        record
            .throughput
            .entry(kind)
            .or_insert(Ewma { value: 0.0 })
            .sample(items as f64 / secs);
        record.latency.entry(kind).or_insert(Ewma { value: 0.0 }).sample(secs);
        record.timeouts = 0;
    }

    /// Records a timeout strike. Returns the strikes accumulated in a row.
    pub fn record_timeout(&self, peer: PeerId) -> u32 {
        let mut records = self.records.lock();
        let record = records.entry(peer).or_default();
        record.timeouts += 1;
        record.timeouts
    }

    /// The batch size this peer has earned for `kind`: its measured
    /// throughput over a target round trip, clamped to protocol bounds.
    pub fn batch_size(&self, peer: PeerId, kind: RequestType, min: usize, max: usize) -> usize {
        const TARGET_RTT: f64 = 1.0;
        let records = self.records.lock();
        let throughput = records
            .get(&peer)
            .and_then(|record| record.throughput.get(&kind))
            .map(|ewma| ewma.value)
            .unwrap_or(0.0);
        if throughput == 0.0 {
            return min
        }
        ((throughput * TARGET_RTT) as usize).clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_follows_throughput() {
        let stats = PeerStats::default();
        let peer = PeerId::random();
        assert_eq!(stats.batch_size(peer, RequestType::Bodies, 16, 192), 16);

        // a fast peer earns bigger batches
        for _ in 0..20 {
            stats.record(peer, RequestType::Bodies, 128, Duration::from_millis(500));
        }
        assert!(stats.batch_size(peer, RequestType::Bodies, 16, 192) > 64);
    }

    #[test]
    fn timeouts_accumulate_until_success() {
        let stats = PeerStats::default();
        let peer = PeerId::random();
        assert_eq!(stats.record_timeout(peer), 1);
        assert_eq!(stats.record_timeout(peer), 2);
        stats.record(peer, RequestType::Headers, 1, Duration::from_millis(10));
        assert_eq!(stats.record_timeout(peer), 1);
    }
}
