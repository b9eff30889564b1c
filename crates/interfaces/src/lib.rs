#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Traits, errors and events shared across rbtp subsystems.
//!
//! Every seam between subsystems lives here: consensus validation, block
//! execution (the VM is a collaborator behind [`executor::BlockExecutor`]),
//! storage providers, p2p download clients and the typed event classes the
//! node broadcasts.

/// Consensus validation contract and errors.
pub mod consensus;

/// Block execution seam towards the virtual machine.
pub mod executor;

/// Typed event classes and their broadcast plumbing.
pub mod events;

/// Read/write provider traits over chain storage.
pub mod provider;

/// Peer-to-peer download client contracts.
pub mod p2p;

/// Sync progress reporting.
pub mod sync;

/// Shared test doubles for the seams above.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod error;
pub use error::Error;
