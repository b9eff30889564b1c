use crate::{
    consensus::ConsensusError, executor::ExecutorError, p2p::error::DownloadError,
    provider::ProviderError,
};
use rbtp_trie::StateError;

/// The top-level error union crossing subsystem seams.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A consensus rule was violated.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    /// Block execution failed.
    #[error(transparent)]
    Execution(#[from] ExecutorError),
    /// A storage provider failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// State access failed.
    #[error(transparent)]
    State(#[from] StateError),
    /// A download failed.
    #[error(transparent)]
    Download(#[from] DownloadError),
}
