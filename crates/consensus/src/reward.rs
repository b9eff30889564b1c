//! Block and ommer reward schedule.

use rbtp_chainspec::{ChainSpec, Hardfork};
use rbtp_primitives::{constants::WEI_PER_BTP, BlockNumber, Header, U256};

/// The base miner reward at the given height: 5 btp at launch, reduced to 3
/// at Byzantium and 2 at Constantinople.
pub fn block_reward(spec: &ChainSpec, number: BlockNumber) -> U256 {
    let btp = |n: u64| U256::from(WEI_PER_BTP) * U256::from(n);
    if spec.fork_active(Hardfork::Constantinople, number) {
        btp(2)
    } else if spec.fork_active(Hardfork::Byzantium, number) {
        btp(3)
    } else {
        btp(5)
    }
}

/// The reward credited to an ommer's miner:
/// `(8 + ommer.number − block.number) · base / 8`.
pub fn ommer_reward(base: U256, block_number: BlockNumber, ommer: &Header) -> U256 {
    let depth_factor = U256::from(8 + ommer.number - block_number);
    depth_factor * base / U256::from(8)
}

/// The bonus credited to the including miner per ommer: `base / 32`.
pub fn nephew_reward(base: U256) -> U256 {
    base / U256::from(32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbtp_chainspec::{ChainSpecBuilder, ForkCondition};

    #[test]
    fn reward_shrinks_per_era() {
        let spec = ChainSpecBuilder::default()
            .with_fork(Hardfork::Byzantium, ForkCondition::Block(10))
            .with_fork(Hardfork::Constantinople, ForkCondition::Block(20))
            .build();
        let btp = U256::from(WEI_PER_BTP);
        assert_eq!(block_reward(&spec, 0), btp * U256::from(5));
        assert_eq!(block_reward(&spec, 10), btp * U256::from(3));
        assert_eq!(block_reward(&spec, 25), btp * U256::from(2));
    }

    #[test]
    fn ommer_reward_decays_with_depth() {
        let base = U256::from(8_000u64);
        let ommer = |number| Header { number, ..Default::default() };
        // one generation back earns 7/8, seven back earns 1/8
        assert_eq!(ommer_reward(base, 10, &ommer(9)), U256::from(7_000u64));
        assert_eq!(ommer_reward(base, 10, &ommer(3)), U256::from(1_000u64));
        assert_eq!(nephew_reward(base), U256::from(250u64));
    }
}
