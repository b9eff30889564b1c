#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! The canonical chain manager.
//!
//! [`BlockChain`] owns the chain storage, drives the consensus engine and
//! the block executor, selects the canonical chain by total difficulty and
//! reorganizes when a heavier branch appears. All state-root-changing
//! operations are serialized; head events are published strictly after the
//! new head is persisted.

mod chain;
mod executor;

pub use chain::{BlockChain, InsertFailure, TieBreak};
pub use executor::{contract_address, TransferExecutor};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
