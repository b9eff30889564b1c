#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! The rbtp transaction pool.
//!
//! Transactions are admitted against signature, nonce, balance and gas
//! rules, then live per sender in one of two sets: `pending` (contiguous
//! nonces, ready for mining) or `queued` (gapped). Price floors, slot
//! limits and replacement bumps keep the pool bounded; local transactions
//! are pinned through a journal and exempt from price eviction. Every
//! admission or promotion is published as a [`NewTxsEvent`].
//!
//! [`NewTxsEvent`]: rbtp_interfaces::events::NewTxsEvent

mod config;
mod error;
mod journal;
mod list;
mod maintain;
mod pool;

pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use list::PoolTransaction;
pub use pool::{PoolStatus, TxPool};
