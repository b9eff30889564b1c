#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Durable chain storage: a typed schema over a hot key-value tier plus an
//! append-only "freezer" for finalized ancient history.
//!
//! The hot tier sits behind [`KeyValueStore`]: tests run on the memory
//! backend, the node runs on the log-structured [`FileStore`]. Once a block
//! range is final it is migrated cold with [`ChainStorage::freeze`]; reads
//! fall through hot → cold transparently.

mod chain;
mod file;
mod freezer;
mod kv;
mod schema;

pub use chain::ChainStorage;
pub use file::FileStore;
pub use freezer::Freezer;
pub use kv::{BatchOp, KeyValueStore, MemoryStore};
pub use schema::DB_VERSION;
