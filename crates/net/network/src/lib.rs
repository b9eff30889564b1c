#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Peer management and message dispatch for the btp protocol.
//!
//! The [`NetworkManager`] bridges the encrypted transport below to the
//! transaction pool, the announce fetcher and the bulk downloaders: it
//! validates `Status` handshakes (network id, genesis, fork id), serves
//! header/body/receipt/state requests from local storage, applies the
//! propagation policy (full block to `√N` peers, hash announces to the
//! rest) and correlates request/response pairs for the [`FetchClient`].

mod fetch;
mod fetcher;
mod manager;
mod peers;

pub use fetch::{FetchClient, ResponseFuture};
pub use fetcher::{BlockFetcher, FetcherCommand};
pub use manager::{HandshakeError, NetworkConfig, NetworkManager, PeerEvent};
pub use peers::{Peer, PeerSet, Session};

#[cfg(test)]
mod tests;
