//! Difficulty retargeting, piecewise by active fork.

use rbtp_chainspec::{ChainSpec, Hardfork};
use rbtp_primitives::{SealedHeader, EMPTY_OMMER_ROOT_HASH, U256};

/// No block may fall below this difficulty.
pub const MINIMUM_DIFFICULTY: u64 = 131_072;

/// Denominator of the per-block adjustment step.
const DIFFICULTY_BOUND_DIVISOR: u64 = 2048;

/// Frontier considers a block "fast" below this parent distance.
const DURATION_LIMIT: u64 = 13;

/// Byzantium pushes the bomb back by this many blocks.
const BYZANTIUM_BOMB_DELAY: u64 = 3_000_000;

/// Constantinople pushes the bomb back by this many blocks.
const CONSTANTINOPLE_BOMB_DELAY: u64 = 5_000_000;

/// The difficulty a child of `parent` sealed at `timestamp` must carry.
pub fn calc_difficulty(spec: &ChainSpec, parent: &SealedHeader, timestamp: u64) -> U256 {
    let number = parent.number + 1;
    let delta = timestamp.saturating_sub(parent.timestamp);

    let mut difficulty = if spec.fork_active(Hardfork::Byzantium, number) {
        // EIP-100: retarget on ommer-adjusted parent time
        let expected = if parent.ommers_hash == EMPTY_OMMER_ROOT_HASH { 1 } else { 2 };
        adjusted(parent.difficulty, expected - (delta / 9) as i64)
    } else if spec.fork_active(Hardfork::Homestead, number) {
        adjusted(parent.difficulty, 1 - (delta / 10) as i64)
    } else {
        // frontier: a fixed step up for fast blocks, down for slow ones
        let step = parent.difficulty / U256::from(DIFFICULTY_BOUND_DIVISOR);
        if delta < DURATION_LIMIT {
            parent.difficulty + step
        } else {
            parent.difficulty.saturating_sub(step)
        }
    };

    difficulty = difficulty.max(U256::from(MINIMUM_DIFFICULTY));

    // the exponential ice-age term, pushed back per fork
    let delay = if spec.fork_active(Hardfork::Constantinople, number) {
        CONSTANTINOPLE_BOMB_DELAY
    } else if spec.fork_active(Hardfork::Byzantium, number) {
        BYZANTIUM_BOMB_DELAY
    } else {
        0
    };
    let fake_number = number.saturating_sub(delay);
    let period = fake_number / 100_000;
    if period > 1 {
        difficulty += U256::from(2).pow(U256::from(period - 2));
    }

    difficulty
}

/// `parent ± parent/2048 · clamp(sigma, -99, ..)`
fn adjusted(parent_difficulty: U256, sigma: i64) -> U256 {
    let sigma = sigma.max(-99);
    let step = parent_difficulty / U256::from(DIFFICULTY_BOUND_DIVISOR);
    if sigma >= 0 {
        parent_difficulty + step * U256::from(sigma as u64)
    } else {
        parent_difficulty.saturating_sub(step * U256::from((-sigma) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbtp_chainspec::{ChainSpecBuilder, ForkCondition};
    use rbtp_primitives::{Header, B256};

    fn parent(difficulty: u64, timestamp: u64) -> SealedHeader {
        Header {
            number: 100,
            difficulty: U256::from(difficulty),
            timestamp,
            ..Default::default()
        }
        .seal_slow()
    }

    fn spec_with(fork: Hardfork) -> ChainSpec {
        ChainSpecBuilder::default().with_fork(fork, ForkCondition::Block(0)).build()
    }

    #[test]
    fn fast_blocks_raise_difficulty() {
        let spec = spec_with(Hardfork::Homestead);
        let parent = parent(2_000_000, 1000);
        let fast = calc_difficulty(&spec, &parent, 1005);
        let slow = calc_difficulty(&spec, &parent, 1300);
        assert!(fast > parent.difficulty);
        assert!(slow < parent.difficulty);
    }

    #[test]
    fn difficulty_is_monotone_in_timestamp() {
        // for two candidates on the same parent, the earlier timestamp never
        // yields lower difficulty
        for fork in [Hardfork::Frontier, Hardfork::Homestead, Hardfork::Byzantium] {
            let spec = spec_with(fork);
            let parent = parent(5_000_000, 5000);
            let mut last = U256::MAX;
            for delta in [1u64, 5, 9, 10, 13, 20, 50, 100, 1000] {
                let diff = calc_difficulty(&spec, &parent, 5000 + delta);
                assert!(diff <= last, "difficulty must not grow with timestamp ({fork:?})");
                last = diff;
            }
        }
    }

    #[test]
    fn clamps_to_minimum() {
        let spec = spec_with(Hardfork::Homestead);
        let parent = parent(MINIMUM_DIFFICULTY, 0);
        let diff = calc_difficulty(&spec, &parent, 10_000);
        assert_eq!(diff, U256::from(MINIMUM_DIFFICULTY));
    }

    #[test]
    fn byzantium_counts_ommers() {
        let spec = spec_with(Hardfork::Byzantium);
        let plain = parent(4_000_000, 1000);
        let mut with_ommers = plain.header().clone();
        with_ommers.ommers_hash = B256::repeat_byte(1);
        let with_ommers = with_ommers.seal_slow();

        // an ommer-bearing parent targets a slower child cadence
        assert!(
            calc_difficulty(&spec, &with_ommers, 1010) >
                calc_difficulty(&spec, &plain, 1010)
        );
    }

    #[test]
    fn bomb_is_delayed_by_forks() {
        let base = Header {
            number: 3_199_999,
            difficulty: U256::from(10_000_000u64),
            timestamp: 1000,
            ..Default::default()
        }
        .seal_slow();

        let frontier = spec_with(Hardfork::Frontier);
        let byzantium = spec_with(Hardfork::Byzantium);
        // at height 3.2M the undelayed bomb dwarfs the byzantium-delayed one
        assert!(
            calc_difficulty(&frontier, &base, 1010) > calc_difficulty(&byzantium, &base, 1010)
        );
    }
}
