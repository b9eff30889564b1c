use rbtp_primitives::Address;
use std::{path::PathBuf, time::Duration};

/// Transaction pool limits and policies.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum gas price a non-local transaction must offer.
    pub price_limit: u128,
    /// Percentage a replacement must outbid the incumbent by.
    pub price_bump: u128,
    /// Executable slots guaranteed per account.
    pub account_slots: usize,
    /// Maximum executable slots across all accounts.
    pub global_slots: usize,
    /// Non-executable slots guaranteed per account.
    pub account_queue: usize,
    /// Maximum non-executable slots across all accounts.
    pub global_queue: usize,
    /// How long a non-executable transaction may idle before eviction.
    pub lifetime: Duration,
    /// Addresses treated as local regardless of how their transactions
    /// arrive.
    pub locals: Vec<Address>,
    /// Journal file for local transactions, surviving restarts.
    pub journal: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            price_limit: 1,
            price_bump: 10,
            account_slots: 16,
            global_slots: 4096,
            account_queue: 64,
            global_queue: 1024,
            lifetime: Duration::from_secs(3 * 60 * 60),
            locals: Vec::new(),
            journal: None,
        }
    }
}
