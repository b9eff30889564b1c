#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Multi-peer bulk synchronization.
//!
//! The pipeline is headers-first: a skeleton of every 192nd header comes
//! from the master peer, gaps fill in parallel from whoever is idle, then
//! bodies (and receipts in fast mode) stream in ascending order under
//! bounded buffering. Fast sync additionally walks the trie at the pivot
//! block (head − 64) breadth-first before switching to full import. A
//! cancellation token threads through every stage; in-flight replies are
//! drained cooperatively.

mod bodies;
mod headers;
mod mode;
mod receipts;
mod state;
mod stats;
mod sync;

pub use bodies::BodiesSync;
pub use headers::HeadersSync;
pub use mode::SyncMode;
pub use receipts::ReceiptsSync;
pub use state::StateSync;
pub use stats::{PeerStats, RequestType};
pub use sync::{Downloader, SyncOutcome, PIVOT_DISTANCE};
