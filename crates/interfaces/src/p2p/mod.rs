/// Download client base contract.
pub mod download;

/// Request and download error types.
pub mod error;

/// Request priority.
pub mod priority;

/// Headers download client.
pub mod headers;

/// Block bodies download client.
pub mod bodies;

/// Receipts download client (fast sync).
pub mod receipts;

/// State trie node download client (fast sync).
pub mod state;
